//! Cart commands.

use std::io::Write;

use cartwheel_core::ProductId;
use cartwheel_storefront::CartContext;
use cartwheel_storefront::views::{ActionOutcome, BadgeView, CartView};

use super::CliError;

/// Print the authoritative cart.
///
/// # Errors
///
/// Returns an error if the cart cannot be read.
pub async fn show(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    let mut page = ctx.cart_page()?;
    let view = page.load().await?;
    write_cart(view, out)
}

/// Print the header badge.
///
/// With `cached`, the count comes from the local snapshot and no request is
/// made. Otherwise a failed read prints `Cart (?)` rather than failing.
///
/// # Errors
///
/// Returns an error if client storage fails.
pub async fn badge(ctx: &CartContext, cached: bool, out: &mut impl Write) -> Result<(), CliError> {
    let badge = if cached {
        BadgeView {
            count: ctx.cache().summary().map(|s| s.item_count),
        }
    } else {
        let projector = ctx.mount_badge().await?;
        let badge = BadgeView::from(projector.display());
        projector.unmount();
        badge
    };
    writeln!(out, "{badge}")?;
    Ok(())
}

/// Change a product's quantity by `delta`, then print the badge.
///
/// # Errors
///
/// Returns an error if the change is not confirmed by the backend.
pub async fn adjust(
    ctx: &CartContext,
    product_id: ProductId,
    delta: i32,
    out: &mut impl Write,
) -> Result<(), CliError> {
    ctx.add_or_adjust(product_id, delta).await?;
    write_cached_badge(ctx, out)
}

/// Remove a product's line.
///
/// # Errors
///
/// Returns an error if the cart cannot be read or the change is not
/// confirmed.
pub async fn remove(ctx: &CartContext, product_id: ProductId, out: &mut impl Write) -> Result<(), CliError> {
    let mut page = ctx.cart_page()?;
    page.load().await?;
    match page.delete(product_id).await? {
        ActionOutcome::NotInCart => writeln!(out, "Product {product_id} is not in the cart.")?,
        ActionOutcome::Applied | ActionOutcome::Disabled => write_cached_badge(ctx, out)?,
    }
    Ok(())
}

fn write_cached_badge(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    let badge = BadgeView {
        count: ctx.cache().summary().map(|s| s.item_count),
    };
    writeln!(out, "{badge}")?;
    Ok(())
}

fn write_cart(view: &CartView, out: &mut impl Write) -> Result<(), CliError> {
    if view.items.is_empty() {
        writeln!(out, "Your cart is empty.")?;
        return Ok(());
    }

    for item in &view.items {
        writeln!(
            out,
            "{:>6}  {:<32}  {:>4} x {:>10}  {:>10}",
            item.product_id.as_i64(),
            item.title,
            item.quantity,
            item.price,
            item.line_price,
        )?;
    }
    writeln!(out, "{} items, subtotal {}", view.item_count, view.subtotal)?;
    Ok(())
}
