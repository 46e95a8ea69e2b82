//! Runs a handful of checkouts against a local database and prints the sales report.
//!
//! `RUST_LOG=cart_checkout=debug cargo run --example checkout` shows every state transition.

use cart_checkout::{CheckoutConfig, ShopService, catalog::default_products};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = CheckoutConfig::from_env()?;
    let service = ShopService::open(&config)?;
    service.seed_catalog(&default_products())?;

    for product in service.list_products()? {
        println!("{:<4} {:<10} {:>6} cents", product.id, product.name, product.price_cents);
    }

    for (n, product_id) in ["p1", "p2", "p3", "p1", "p2", "p3"].iter().enumerate() {
        let user = format!("demo-user-{}", n % 2);
        service.add_item(&user, product_id, 2)?;

        // spend the current offer whenever there is one
        if let Some(offer) = service.available_coupons()?.into_iter().next() {
            service.apply_coupon(&user, &offer.code)?;
        }

        match service.checkout(&user) {
            Ok(receipt) => {
                println!(
                    "order #{} for {}: {} - {} = {} cents",
                    receipt.order.order_number,
                    receipt.order.user_id,
                    receipt.order.subtotal_cents,
                    receipt.order.discount_cents,
                    receipt.order.total_cents,
                );
                if let Some(coupon) = receipt.generated_coupon {
                    println!("  earned {} ({}% off)", coupon.code, coupon.discount_percent);
                }
            }
            Err(err) => println!("checkout for {user} failed [{}]: {err}", err.kind().as_str()),
        }
    }

    let report = service.sales_report()?;
    println!(
        "{} orders, {} cents gross, {} cents discounted",
        report.total_orders, report.total_amount_cents, report.total_discount_cents
    );
    Ok(())
}
