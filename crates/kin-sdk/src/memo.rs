// ============================================================================
// KIN-SDK - Memo Template
// ============================================================================
// Every SDK transaction carries `<version>-<app id>-<text>` so the ecosystem
// can attribute traffic to apps.

use crate::config::{APP_ID_LENGTH, MEMO_CAP, MEMO_TEMPLATE_VERSION};
use crate::error::KinError;
use crate::Result;

/// Exactly four ASCII letters or digits
pub fn is_valid_app_id(app_id: &str) -> bool {
    app_id.len() == APP_ID_LENGTH && app_id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Build the templated memo, failing if it won't fit in a text memo
pub fn build_memo(app_id: &str, text: Option<&str>) -> Result<String> {
    let memo = format!(
        "{}-{}-{}",
        MEMO_TEMPLATE_VERSION,
        app_id,
        text.unwrap_or_default()
    );
    check_length(&memo)?;
    Ok(memo)
}

pub fn check_length(memo: &str) -> Result<()> {
    if memo.len() > MEMO_CAP {
        return Err(KinError::MemoTooLong {
            length: memo.len(),
            cap: MEMO_CAP,
        });
    }
    Ok(())
}
