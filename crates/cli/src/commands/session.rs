//! Session commands.

use std::io::Write;

use cartwheel_storefront::CartContext;

use super::CliError;

/// Print the session id, creating it on first use.
///
/// # Errors
///
/// Returns an error if client storage fails.
pub fn show(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    let session = ctx.session_id()?;
    writeln!(out, "{session}")?;
    Ok(())
}
