// 主机密钥指纹格式化

/// Renders digest bytes as lowercase hex pairs joined by `:`.
///
/// An empty digest renders as an empty string.
pub fn hex_colon(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len().saturating_mul(3));
    for (i, byte) in digest.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Rendered length of a digest of `len` bytes.
pub fn rendered_len(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        len * 3 - 1
    }
}
