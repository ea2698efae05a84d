//! 旁路命令令牌的编解码

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// URL 中标识命令令牌的片段前缀
pub const COMMAND_MARKER: &str = "#argosa-command=";

/// 编码后令牌的最大长度
pub const MAX_TOKEN_LEN: usize = 64 * 1024;

/// 从 URL 中截取命令令牌；没有标记时返回 None
pub fn extract_token(url: &str) -> Option<&str> {
    let start = url.find(COMMAND_MARKER)? + COMMAND_MARKER.len();
    let token = &url[start..];
    // 令牌之后可能还跟着其它片段参数
    let end = token.find('&').unwrap_or(token.len());
    Some(token[..end].trim())
}

/// 解码 base64 令牌（兼容标准与 URL 安全字母表、有无填充、常见百分号转义）
pub fn decode_token(token: &str) -> Result<Vec<u8>> {
    if token.is_empty() {
        bail!("命令令牌为空");
    }
    if token.len() > MAX_TOKEN_LEN {
        bail!("命令令牌过长: {} 字节", token.len());
    }

    let unescaped = token
        .replace("%2B", "+")
        .replace("%2b", "+")
        .replace("%2F", "/")
        .replace("%2f", "/")
        .replace("%3D", "=")
        .replace("%3d", "=");

    let engines = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];
    for engine in engines {
        if let Ok(bytes) = engine.decode(&unescaped) {
            return Ok(bytes);
        }
    }
    bail!("命令令牌不是合法的 base64")
}

/// 将 JSON 值编码为带标记的 URL 片段（供测试与调试工具生成命令）
pub fn encode_command_fragment(value: &serde_json::Value) -> Result<String> {
    let json = serde_json::to_vec(value).context("序列化命令失败")?;
    Ok(format!("{}{}", COMMAND_MARKER, URL_SAFE_NO_PAD.encode(json)))
}
