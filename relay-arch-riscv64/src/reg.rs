//! CSR values.

/// `satp.MODE` for Sv39.
pub const SATP_MODE_SV39: u64 = 8;

/// Builds a `satp` value for an Sv39 root table at `root_phys`.
#[must_use]
pub const fn satp(root_phys: u64) -> u64 {
	(SATP_MODE_SV39 << 60) | (root_phys >> 12)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn satp_selects_sv39() {
		assert_eq!(satp(0x8020_3000), 0x8000_0000_0008_0203);
	}
}
