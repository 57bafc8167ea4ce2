//! 日志 body 捕获规则: 解压 / 文本分类 / SSE 折叠

use std::borrow::Cow;
use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

/// 按 Content-Encoding 解压；无法识别的编码或解压失败时原样返回
pub fn decompress_body<'a>(encoding: Option<&str>, body: &'a [u8]) -> Cow<'a, [u8]> {
    let encoding = match encoding {
        Some(e) => e.trim().to_ascii_lowercase(),
        None => return Cow::Borrowed(body),
    };

    if encoding.contains("gzip") {
        let mut decoder = flate2::read::GzDecoder::new(body);
        let mut out = Vec::new();
        match decoder.read_to_end(&mut out) {
            Ok(_) => Cow::Owned(out),
            Err(_) => Cow::Borrowed(body),
        }
    } else if encoding.contains("deflate") {
        let mut decoder = flate2::read::ZlibDecoder::new(body);
        let mut out = Vec::new();
        match decoder.read_to_end(&mut out) {
            Ok(_) => Cow::Owned(out),
            Err(_) => Cow::Borrowed(body),
        }
    } else {
        Cow::Borrowed(body)
    }
}

/// 内容类型是否按文本捕获
pub fn is_text_content(content_type: &str) -> bool {
    if content_type.is_empty() {
        return true;
    }
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    media_type.starts_with("text/")
        || media_type.starts_with("application/json")
        || media_type.starts_with("application/xml")
        || media_type.starts_with("application/x-www-form-urlencoded")
}

/// 按捕获规则把 body 转成日志字符串
///
/// 先解压，文本类型按 UTF-8 捕获，其余 base64 编码。
pub fn capture_body(content_type: &str, content_encoding: Option<&str>, body: &[u8]) -> String {
    let decompressed = decompress_body(content_encoding, body);
    if is_text_content(content_type) {
        String::from_utf8_lossy(&decompressed).into_owned()
    } else {
        STANDARD.encode(decompressed.as_ref())
    }
}

/// 把 SSE 响应体折叠成增量内容拼接的单个字符串
///
/// 只看 `data: ` 行；`[DONE]` 跳过；能解析成 OpenAI 块的取
/// `choices[0].delta.content`，解析失败的行保留原始载荷。
pub fn coalesce_sse(body: &str) -> String {
    let mut content = String::new();

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(event) => {
                if let Some(delta) = event
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|choice| choice.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(|v| v.as_str())
                {
                    content.push_str(delta);
                }
            }
            Err(_) => content.push_str(data),
        }
    }

    content
}
