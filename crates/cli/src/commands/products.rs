//! Catalog commands.

use std::io::Write;

use cartwheel_core::{Product, ProductId};
use cartwheel_storefront::CartContext;

use super::CliError;

/// List every product.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub async fn list(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    let products = ctx.catalog().list_products().await?;
    write_table(&products, out)
}

/// Search products by name.
///
/// # Errors
///
/// Returns an error if the query is blank or the catalog cannot be read.
pub async fn search(ctx: &CartContext, query: &str, out: &mut impl Write) -> Result<(), CliError> {
    let products = ctx.catalog().search_products(query).await?;
    if products.is_empty() {
        writeln!(out, "No products match '{query}'.")?;
        return Ok(());
    }
    write_table(&products, out)
}

/// Show one product.
///
/// # Errors
///
/// Returns an error if the product does not exist or cannot be read.
pub async fn show(ctx: &CartContext, id: ProductId, out: &mut impl Write) -> Result<(), CliError> {
    let product = ctx.catalog().get_product(id).await?;
    writeln!(out, "{} (#{})", product.name, product.id)?;
    writeln!(out, "  Price:    {}", product.price)?;
    if let Some(category) = &product.category {
        writeln!(out, "  Category: {category}")?;
    }
    if let Some(image) = &product.image_ref {
        writeln!(out, "  Image:    {image}")?;
    }
    Ok(())
}

fn write_table(products: &[Product], out: &mut impl Write) -> Result<(), CliError> {
    for product in products {
        writeln!(
            out,
            "{:>6}  {:<32}  {:>10}  {}",
            product.id.as_i64(),
            product.name,
            product.price.display(),
            product.category.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}
