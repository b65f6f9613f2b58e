// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

#[cfg(not(windows))]
mod fuzz {
    use honggfuzz::fuzz;
    use uniboot::patch::dtb;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let mut buf = data.to_vec();
                dtb::strip(&mut buf);

                // Blanking must never move anything.
                assert_eq!(buf.len(), data.len());
                assert!(
                    buf.iter()
                        .zip(data)
                        .all(|(&new, &old)| new == old || new == b' ')
                );
                assert!(!buf.windows(4).any(|w| w == b",avb"));
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
