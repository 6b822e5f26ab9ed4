/// Bytes of a datagram shown in debug logs before truncating.
const HEX_PREVIEW_LEN: usize = 64;

// Hex dump of an inbound datagram for debug logging
pub fn hex_preview(data: &[u8]) -> String {
    if data.len() <= HEX_PREVIEW_LEN {
        hex::encode(data)
    } else {
        format!(
            "{}.. (+{} bytes)",
            hex::encode(&data[..HEX_PREVIEW_LEN]),
            data.len() - HEX_PREVIEW_LEN
        )
    }
}
