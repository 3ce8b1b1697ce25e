/// 向上对齐，`align` 必须是 2 的幂
#[inline]
pub const fn align_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (x + (align - 1)) & !(align - 1)
}

#[inline]
pub const fn align_up_u32(x: u32, align: u32) -> u32 {
    align_up(x as u64, align as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up_u32(32, 32), 32);
        assert_eq!(align_up_u32(33, 32), 64);
    }
}
