//! Browser key derivation.
//!
//! A key is the six identifying descriptor fields joined with `|`:
//!
//! ```text
//! os | os_version | browser | browser_version | device | real_mobile
//! linux|22.04|chrome|120||false
//! ```
//!
//! Missing strings render empty and a missing `real_mobile` renders `false`.
//! Separators and backslashes inside fields are escaped, so two descriptors
//! map to the same key exactly when the six fields agree.

use cometa_results_protocol::BrowserInfo;

use crate::error::{ResultsError, Result};
use crate::types::BrowserKey;

const SEPARATOR: char = '|';

pub fn browser_key(info: &BrowserInfo) -> Result<BrowserKey> {
    let browser = info
        .browser
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ResultsError::MalformedBrowser("browser is required".to_string()))?;

    let fields = [
        info.os.as_deref().unwrap_or_default(),
        info.os_version.as_deref().unwrap_or_default(),
        browser,
        info.browser_version.as_deref().unwrap_or_default(),
        info.device.as_deref().unwrap_or_default(),
    ];

    let mut key = String::new();
    for field in fields {
        push_escaped(&mut key, field);
        key.push(SEPARATOR);
    }
    key.push_str(if info.real_mobile.unwrap_or(false) {
        "true"
    } else {
        "false"
    });

    Ok(BrowserKey::from_raw(key))
}

fn push_escaped(out: &mut String, field: &str) {
    for ch in field.chars() {
        if ch == '\\' || ch == SEPARATOR {
            out.push('\\');
        }
        out.push(ch);
    }
}
