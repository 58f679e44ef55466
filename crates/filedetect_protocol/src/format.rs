//! Human-readable one-line rendering of [`DetectResult`].

use crate::types::{DetectResult, DetectSuccess};
use std::fmt;

impl fmt::Display for DetectResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectResult::Success(success) => write_success(f, success),
            DetectResult::Failure(failure) => {
                write!(
                    f,
                    "[DETECT RESULT] [FAIL] md5: {}, time: {}, error_code: {} ({}), error_message: ",
                    failure.fingerprint.as_deref().unwrap_or("-"),
                    failure.elapsed.as_millis(),
                    failure.kind.as_str(),
                    failure.kind.code(),
                )?;
                match &failure.detail {
                    Some(detail) => match detail.to_json() {
                        Ok(json) => write!(f, "{}", json),
                        Err(_) => write!(f, "{}", detail),
                    },
                    None => write!(f, "{}", failure.kind),
                }
            }
        }
    }
}

fn write_success(f: &mut fmt::Formatter<'_>, success: &DetectSuccess) -> fmt::Result {
    write!(
        f,
        "[DETECT RESULT] [SUCCEED] md5: {}, time: {}, result: {}, score: {}",
        success.fingerprint,
        success.elapsed.as_millis(),
        success.verdict,
        success.score
    )?;
    if let Some((virus_type, ext_info)) = success.virus_info() {
        write!(
            f,
            ", virus_type: {}, ext_info: {}",
            virus_type.unwrap_or("-"),
            ext_info.unwrap_or("-")
        )?;
    }
    Ok(())
}
