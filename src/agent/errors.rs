//! Error humanization
//!
//! Raw exception text never reaches the user. Every failure is mapped into
//! one of a small set of Vietnamese messages, keyed by substring patterns
//! for tool-level errors and by variant for typed model errors.

use crate::llm::LlmError;

pub const PARSE_APOLOGY: &str =
    "Xin lỗi, hệ thống gặp lỗi khi phân tích câu hỏi. Vui lòng thử lại hoặc diễn đạt câu hỏi khác đi.";

/// Per-question error shown inside a result block.
pub fn friendly_tool_error(msg: &str) -> String {
    if msg.contains("413") || msg.contains("Request too large") {
        "Nội dung quá dài, vui lòng gửi ngắn hơn.".to_string()
    } else if msg.contains("rate_limit") || msg.contains("TPM") {
        "Rate Limit (Quá tải), vui lòng đợi giây lát.".to_string()
    } else {
        format!("Lỗi kỹ thuật: {msg}")
    }
}

/// Terminal response when the planner's own model call fails.
pub fn friendly_planner_error(err: &LlmError) -> String {
    match err {
        LlmError::PayloadTooLarge(_) => {
            "Nội dung lịch sử trò chuyện vượt quá giới hạn mô hình. Vui lòng tạo hội thoại mới để tiếp tục."
                .to_string()
        }
        LlmError::RateLimited(_) => {
            "Hệ thống đang quá tải (Rate Limit). Bạn vui lòng đợi khoảng 10-20 giây rồi thử lại nhé!"
                .to_string()
        }
        LlmError::ContextLengthExceeded(_) => {
            "Hội thoại đã quá dài. Vui lòng tạo hội thoại mới để tiếp tục.".to_string()
        }
        other => format!("Xin lỗi, đã có lỗi kỹ thuật: {other}."),
    }
}

/// Notice embedded in the manual-synthesis fallback header.
pub fn friendly_synth_error(err: &LlmError) -> String {
    match err {
        LlmError::PayloadTooLarge(_) => "Nội dung quá dài để tổng hợp.".to_string(),
        LlmError::RateLimited(_) => "Hệ thống đang bận (Rate Limit).".to_string(),
        other => format!("Lỗi kỹ thuật: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_patterns() {
        assert_eq!(
            friendly_tool_error("HTTP 413 Request too large"),
            "Nội dung quá dài, vui lòng gửi ngắn hơn."
        );
        assert_eq!(
            friendly_tool_error("rate_limit exceeded: TPM"),
            "Rate Limit (Quá tải), vui lòng đợi giây lát."
        );
        assert_eq!(friendly_tool_error("boom"), "Lỗi kỹ thuật: boom");
    }

    #[test]
    fn test_planner_error_variants() {
        assert!(
            friendly_planner_error(&LlmError::ContextLengthExceeded("x".into()))
                .contains("quá dài")
        );
        assert!(friendly_planner_error(&LlmError::RateLimited("x".into())).contains("10-20 giây"));
        assert!(friendly_planner_error(&LlmError::Api("boom".into())).contains("lỗi kỹ thuật"));
    }
}
