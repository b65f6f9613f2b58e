// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use honggfuzz::fuzz;
    use uniboot::patch::fstab;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let stripped = fstab::strip(data);
                assert!(stripped.len() <= data.len());

                if !data.contains(&b',') {
                    assert_eq!(stripped, data);
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
