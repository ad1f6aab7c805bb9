/// RFC 1071 internet checksum over `data`, as stored in network byte order.
///
/// Computing this over a buffer which already contains its correct checksum yields `0`.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let mut accum: u32 = 0;
    for word in &mut words {
        accum = accum.wrapping_add(u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    // Odd trailing byte, padded with zero.
    if let [last] = words.remainder() {
        accum = accum.wrapping_add(u32::from(u16::from_be_bytes([*last, 0])));
    }
    accum = (accum & 0xffff) + (accum >> 16);
    // Again in case that carried too.
    accum = (accum & 0xffff) + (accum >> 16);
    !(accum as u16)
}
