use serde::Serialize;

use super::cart::CartLine;

/// Totals for a cart at a given discount, in whole currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
}

/// Sum of `offer_price * quantity` over lines whose product still exists.
pub fn subtotal(lines: &[CartLine]) -> i64 {
    lines.iter().map(CartLine::line_total).sum()
}

/// `round(subtotal * percent / 100)`, half away from zero. Percentages
/// outside 0..=100 are clamped.
pub fn discount_amount(subtotal: i64, percent: i32) -> i64 {
    if percent <= 0 || subtotal <= 0 {
        return 0;
    }
    let percent = i64::from(percent.min(100));
    (subtotal * percent + 50) / 100
}

pub fn compute_totals(lines: &[CartLine], discount_percent: i32) -> Totals {
    totals_for_subtotal(subtotal(lines), discount_percent)
}

pub fn totals_for_subtotal(subtotal: i64, discount_percent: i32) -> Totals {
    let discount = discount_amount(subtotal, discount_percent);
    Totals {
        subtotal,
        discount,
        total: subtotal - discount,
    }
}

/// Converts whole units to the gateway's minor units.
pub fn to_minor_units(amount: i64) -> i64 {
    amount * 100
}
