// crates/scriptpad-server/src/intel/dispatch.rs
// Request dispatcher - forwards editor requests to the script's server and
// translates between user-source and assembled-program line numbers

use std::sync::Arc;

use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};
use scriptpad_types::{
    intel_methods, CodeCheckParams, CompletionParams, CompletionResponse, IntelResponse,
    QuickFix, QuickFixParams, QuickFixResponse, Script,
};

use super::catalog::{ServerCatalog, SessionLease};

/// Editor-facing entry point for code intelligence. Positions crossing this
/// boundary are always in the user's source coordinates; the assembled
/// program's synthetic prefix never leaks out.
pub struct Dispatcher {
    catalog: Arc<ServerCatalog>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<ServerCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve a session for an operation whose response permits an empty
    /// value. An unresolvable session (unknown script, entry gone) yields
    /// `None`; launch and transport failures still propagate.
    async fn resolve_session(&self, script_id: Uuid) -> Result<Option<SessionLease>> {
        match self.catalog.lease(script_id, true).await {
            Ok(lease) => Ok(lease),
            Err(ScriptpadError::ScriptNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Full-buffer diagnostics for a script. Empty when the session cannot
    /// be resolved.
    pub async fn check_code(&self, script_id: Uuid) -> Result<QuickFixResponse> {
        let Some(mut lease) = self.resolve_session(script_id).await? else {
            return Ok(QuickFixResponse::default());
        };

        let params = serde_json::to_value(CodeCheckParams {
            file_name: lease.file_name().to_string(),
        })?;
        let response = lease.request(intel_methods::CHECK_CODE, params).await;
        let prefix = lease.prefix_line_count();
        drop(lease);

        let mut fixes: QuickFixResponse = parse_result(script_id, "check_code", response)?;
        for fix in &mut fixes.quick_fixes {
            translate_to_user(fix, prefix);
        }
        Ok(fixes)
    }

    /// Completions at a position in the user's source. Empty when the
    /// session cannot be resolved.
    pub async fn completions(
        &self,
        script_id: Uuid,
        line: u32,
        column: u32,
        word_to_complete: &str,
    ) -> Result<CompletionResponse> {
        let Some(mut lease) = self.resolve_session(script_id).await? else {
            return Ok(CompletionResponse::default());
        };
        let prefix = lease.prefix_line_count();

        let params = serde_json::to_value(CompletionParams {
            file_name: lease.file_name().to_string(),
            line: line + prefix,
            column,
            word_to_complete: word_to_complete.to_string(),
        })?;
        let response = lease.request(intel_methods::AUTOCOMPLETE, params).await;
        drop(lease);

        let mut completions: CompletionResponse =
            parse_result(script_id, "completions", response)?;
        if let Some(anchor) = completions.anchor_line {
            completions.anchor_line = Some(anchor.saturating_sub(prefix).max(1));
        }
        Ok(completions)
    }

    /// Quick fixes at a position in the user's source. Empty when the
    /// session cannot be resolved.
    pub async fn quick_fixes(
        &self,
        script_id: Uuid,
        line: u32,
        column: u32,
    ) -> Result<QuickFixResponse> {
        let Some(mut lease) = self.resolve_session(script_id).await? else {
            return Ok(QuickFixResponse::default());
        };
        let prefix = lease.prefix_line_count();

        let params = serde_json::to_value(QuickFixParams {
            file_name: lease.file_name().to_string(),
            line: line + prefix,
            column,
        })?;
        let response = lease.request(intel_methods::QUICK_FIXES, params).await;
        drop(lease);

        let mut fixes: QuickFixResponse = parse_result(script_id, "quick_fixes", response)?;
        for fix in &mut fixes.quick_fixes {
            translate_to_user(fix, prefix);
        }
        Ok(fixes)
    }

    /// Propagate edited code to the script's session, if it has one
    pub async fn buffer_updated(&self, script: &Script) -> Result<()> {
        self.catalog.update_code(script).await
    }
}

/// Unwrap a server response into its typed result, logging failures before
/// propagating them
fn parse_result<T>(
    script_id: Uuid,
    operation: &str,
    response: Result<IntelResponse>,
) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            error!(script_id = %script_id, operation, error = %e, "Intelligence request failed");
            return Err(e);
        }
    };
    if let Some(message) = response.error {
        error!(script_id = %script_id, operation, error = %message, "Intelligence server reported an error");
        return Err(ScriptpadError::Intel(message));
    }
    match response.result {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(T::default()),
    }
}

/// Shift a server-side position back into user-source coordinates. Positions
/// inside the synthetic prefix clamp to line 1 and are flagged.
fn translate_to_user(fix: &mut QuickFix, prefix: u32) {
    if fix.line > prefix {
        fix.line -= prefix;
        fix.in_user_code = true;
    } else {
        fix.line = 1;
        fix.in_user_code = false;
    }
    if fix.end_line > prefix {
        fix.end_line -= prefix;
    } else {
        fix.end_line = fix.line;
    }
}
