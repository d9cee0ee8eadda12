use anyhow::Result;
use asection::MacroCall;

use crate::writer::MarkupWriter;

/// The template a render pass executes. Macros produce markup by
/// calling into the writer in document order.
pub trait Template {
    /// Identifies the template in error messages.
    fn classpath(&self) -> &str;

    /// During a partial refresh this is also called for the content of
    /// sections that are not kept, while the filter section is being
    /// looked for. Macros should only act through `out`; their errors
    /// abort the pass either way.
    fn call_macro(&self, call: &MacroCall, out: &mut MarkupWriter) -> Result<()>;
}
