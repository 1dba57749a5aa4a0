//! Stable diagnostic codes raised while resolving advice.

use super::{Diagnostic, DiagnosticCode};

pub const TEMPLATE_NOT_FOUND: &str = "ADV101";
pub const TEMPLATE_ATTRIBUTE_MISMATCH: &str = "ADV102";
pub const TEMPLATE_NOT_MARKED: &str = "ADV103";
pub const TEMPLATE_SIGNATURE_MISMATCH: &str = "ADV104";
pub const TEMPLATE_KIND_MISMATCH: &str = "ADV105";

pub const MEMBER_CONFLICT: &str = "ADV201";
pub const NEW_ON_SAME_TYPE: &str = "ADV202";
pub const INCOMPATIBLE_MEMBER_KIND: &str = "ADV203";
pub const MEMBER_NOT_VIRTUAL: &str = "ADV204";
pub const MEMBER_SEALED: &str = "ADV205";
pub const MEMBER_TYPE_MISMATCH: &str = "ADV206";
pub const OVERRIDE_TARGET_NOT_FOUND: &str = "ADV207";
pub const OVERRIDE_TARGET_EXTERNAL: &str = "ADV208";
pub const STATIC_MISMATCH: &str = "ADV209";
pub const INTERFACE_ALREADY_IMPLEMENTED: &str = "ADV210";
pub const INTERFACE_SKIPPED: &str = "ADV211";
pub const INTRODUCTION_INTO_EXTERNAL: &str = "ADV212";

pub const CONTRACT_TYPE_MISMATCH: &str = "ADV301";
pub const CONTRACT_EXPANSION_SKIPPED: &str = "ADV302";

pub const NOT_AN_INTERFACE: &str = "ADV401";
pub const OPEN_GENERIC_INTERFACE: &str = "ADV402";
pub const UNBOUND_TYPE_PARAMETER: &str = "ADV403";

const CATEGORY: &str = "advice";

fn prefixed(code: &str, message: String) -> String {
    if message.starts_with('[') {
        message
    } else {
        format!("[{code}] {message}")
    }
}

#[must_use]
pub fn error(code: &'static str, message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(prefixed(code, message.into()))
        .with_code(DiagnosticCode::new(code, Some(CATEGORY.into())))
}

#[must_use]
pub fn warning(code: &'static str, message: impl Into<String>) -> Diagnostic {
    Diagnostic::warning(prefixed(code, message.into()))
        .with_code(DiagnosticCode::new(code, Some(CATEGORY.into())))
}

#[must_use]
pub fn note(message: impl Into<String>) -> Diagnostic {
    Diagnostic::note(message.into())
}
