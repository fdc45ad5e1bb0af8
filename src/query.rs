//! One-shot query helper.

use crate::config::ClaudeAgentOptions;
use crate::error::SdkError;
use crate::internal::query::Query;
use crate::transport::subprocess_cli::PromptMode;

/// Run a single prompt in print mode and return the live message stream.
///
/// The prompt goes on the command line and stdin stays closed, so control
/// methods on the returned [`Query`] are no-ops. Pull until `None`, then
/// check [`Query::error`].
///
/// ```no_run
/// use claude_agent_bridge::query;
///
/// # fn main() -> Result<(), claude_agent_bridge::SdkError> {
/// let stream = query("What is 2 + 2?", None)?;
/// while let Some(message) = stream.pull() {
///     println!("{}", message.message_type());
/// }
/// if let Some(err) = stream.error() {
///     eprintln!("query failed: {err}");
/// }
/// # Ok(())
/// # }
/// ```
pub fn query(
    prompt: impl Into<String>,
    options: Option<ClaudeAgentOptions>,
) -> Result<Query, SdkError> {
    Query::new(PromptMode::Text(prompt.into()), options.unwrap_or_default())
}
