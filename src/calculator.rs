//! Amount Calculation
//!
//! Pure recompute of line amounts, currency conversion, tax, and rounding.
//! Only this module writes the document's computed fields. Calling
//! `recalculate` repeatedly with unchanged inputs yields identical totals.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentTotals};
use crate::error::{ValidationError, ValidationResult};

/// Per-document-type calculation settings, loaded with the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationPolicy {
    /// Tax rate applied to net_total (e.g. "0.10" for 10%)
    #[serde(default)]
    pub tax_rate: Decimal,
    /// Reject documents with no line items
    #[serde(default = "default_requires_line_items")]
    pub requires_line_items: bool,
}

fn default_requires_line_items() -> bool {
    true
}

impl Default for CalculationPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            requires_line_items: true,
        }
    }
}

/// Recompute all derived amounts on the document
///
/// Rounds the grand total to the currency's minor unit, half-to-even, and
/// carries the difference as an explicit signed `rounding_adjustment`.
pub fn recalculate(doc: &mut Document, policy: &CalculationPolicy) -> ValidationResult<()> {
    validate_inputs(doc, policy)?;

    let conversion_rate = doc.conversion_rate;
    let mut total_qty = Decimal::ZERO;
    let mut net_total = Decimal::ZERO;
    let mut base_total = Decimal::ZERO;

    for item in &mut doc.line_items {
        item.amount = item.qty * item.rate;
        item.base_amount = item.amount * conversion_rate;
        total_qty += item.qty;
        net_total += item.amount;
        base_total += item.base_amount;
    }

    let taxes = net_total * policy.tax_rate;
    let base_taxes = taxes * conversion_rate;
    let grand_total = net_total + taxes;
    let base_grand_total = base_total + base_taxes;

    let rounded_total = grand_total.round_dp_with_strategy(
        currency_exponent(&doc.currency),
        RoundingStrategy::MidpointNearestEven,
    );
    let rounding_adjustment = rounded_total - grand_total;

    doc.totals = DocumentTotals {
        total_qty,
        net_total,
        base_total,
        taxes,
        base_taxes,
        grand_total,
        base_grand_total,
        rounded_total,
        rounding_adjustment,
    };
    doc.totals_stale = false;
    doc.updated_at = Utc::now();

    Ok(())
}

fn validate_inputs(doc: &Document, policy: &CalculationPolicy) -> ValidationResult<()> {
    if doc.currency.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "currency".to_string(),
        });
    }

    if doc.conversion_rate <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveConversionRate {
            value: doc.conversion_rate,
        });
    }

    if policy.requires_line_items && doc.line_items.is_empty() {
        return Err(ValidationError::NoLineItems);
    }

    for (idx, item) in doc.line_items.iter().enumerate() {
        // Rows are reported 1-based, matching the numbering on the document
        let row = idx + 1;

        if item.qty <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity {
                row,
                value: item.qty,
            });
        }
        if item.rate < Decimal::ZERO {
            return Err(ValidationError::NegativeRate {
                row,
                value: item.rate,
            });
        }
    }

    Ok(())
}

/// Minor-unit digits for a currency code
fn currency_exponent(code: &str) -> u32 {
    match code {
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LineItem;
    use uuid::Uuid;

    fn invoice(currency: &str, items: Vec<LineItem>) -> Document {
        let mut doc = Document::new("sales_invoice", "draft", Uuid::new_v4(), "acme", currency);
        doc.set_line_items(items);
        doc
    }

    fn ten_percent() -> CalculationPolicy {
        CalculationPolicy {
            tax_rate: Decimal::new(10, 2),
            requires_line_items: true,
        }
    }

    #[test]
    fn test_worked_example() {
        let mut doc = invoice(
            "USD",
            vec![
                LineItem::new("widget", Decimal::from(2), Decimal::from(100)),
                LineItem::new("gadget", Decimal::from(3), Decimal::from(150)),
            ],
        );

        recalculate(&mut doc, &ten_percent()).unwrap();

        let totals = doc.totals();
        assert_eq!(totals.total_qty, Decimal::from(5));
        assert_eq!(totals.net_total, Decimal::from(650));
        assert_eq!(totals.taxes, Decimal::from(65));
        assert_eq!(totals.grand_total, Decimal::from(715));
        assert_eq!(totals.base_grand_total, Decimal::from(715));
        assert_eq!(totals.rounding_adjustment, Decimal::ZERO);
        assert!(!doc.totals_stale);
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let mut doc = invoice(
            "USD",
            vec![LineItem::new("widget", Decimal::from(7), Decimal::new(1995, 2))],
        );

        recalculate(&mut doc, &ten_percent()).unwrap();
        let first = doc.totals().clone();

        recalculate(&mut doc, &ten_percent()).unwrap();
        assert_eq!(doc.totals(), &first);
    }

    #[test]
    fn test_invariants_hold_exactly() {
        let mut doc = invoice(
            "USD",
            vec![
                LineItem::new("a", Decimal::from(3), Decimal::new(333, 2)),
                LineItem::new("b", Decimal::from(1), Decimal::new(17, 2)),
            ],
        );

        recalculate(&mut doc, &ten_percent()).unwrap();

        let t = doc.totals();
        assert_eq!(t.grand_total, t.net_total + t.taxes);
        assert_eq!(t.rounded_total, t.grand_total + t.rounding_adjustment);
        assert_eq!(t.base_grand_total, t.base_total + t.base_taxes);
    }

    #[test]
    fn test_currency_conversion() {
        let mut doc = invoice(
            "EUR",
            vec![LineItem::new("widget", Decimal::from(2), Decimal::from(100))],
        )
        .with_conversion_rate(Decimal::new(11, 1));

        recalculate(&mut doc, &ten_percent()).unwrap();

        let t = doc.totals();
        assert_eq!(t.net_total, Decimal::from(200));
        assert_eq!(t.base_total, Decimal::from(220));
        assert_eq!(t.taxes, Decimal::from(20));
        assert_eq!(t.base_taxes, Decimal::from(22));
        assert_eq!(t.base_grand_total, Decimal::from(242));
    }

    #[test]
    fn test_rounding_half_to_even() {
        let no_tax = CalculationPolicy {
            tax_rate: Decimal::ZERO,
            requires_line_items: true,
        };

        // 2.345 is midway between 2.34 and 2.35; half-even picks 2.34
        let mut doc = invoice(
            "USD",
            vec![LineItem::new("a", Decimal::ONE, Decimal::new(2345, 3))],
        );
        recalculate(&mut doc, &no_tax).unwrap();
        assert_eq!(doc.totals().rounded_total, Decimal::new(234, 2));
        assert_eq!(doc.totals().rounding_adjustment, Decimal::new(-5, 3));

        // 2.355 rounds up to the even 2.36
        let mut doc = invoice(
            "USD",
            vec![LineItem::new("a", Decimal::ONE, Decimal::new(2355, 3))],
        );
        recalculate(&mut doc, &no_tax).unwrap();
        assert_eq!(doc.totals().rounded_total, Decimal::new(236, 2));
        assert_eq!(doc.totals().rounding_adjustment, Decimal::new(5, 3));
    }

    #[test]
    fn test_zero_decimal_currency() {
        let no_tax = CalculationPolicy {
            tax_rate: Decimal::ZERO,
            requires_line_items: true,
        };

        // JPY has no minor unit; 100.5 is midway and 100 is even
        let mut doc = invoice(
            "JPY",
            vec![LineItem::new("a", Decimal::ONE, Decimal::new(1005, 1))],
        );
        recalculate(&mut doc, &no_tax).unwrap();
        assert_eq!(doc.totals().rounded_total, Decimal::from(100));
        assert_eq!(doc.totals().rounding_adjustment, Decimal::new(-5, 1));
    }

    #[test]
    fn test_rejects_bad_rows_with_one_based_index() {
        let mut doc = invoice(
            "USD",
            vec![
                LineItem::new("ok", Decimal::from(1), Decimal::from(10)),
                LineItem::new("bad", Decimal::from(2), Decimal::from(-1)),
            ],
        );

        let err = recalculate(&mut doc, &ten_percent()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NegativeRate {
                row: 2,
                value: Decimal::from(-1)
            }
        );

        let mut doc = invoice(
            "USD",
            vec![LineItem::new("bad", Decimal::ZERO, Decimal::from(10))],
        );
        let err = recalculate(&mut doc, &ten_percent()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositiveQuantity {
                row: 1,
                value: Decimal::ZERO
            }
        );
    }

    #[test]
    fn test_rejects_empty_items_when_required() {
        let mut doc = invoice("USD", vec![]);
        let err = recalculate(&mut doc, &ten_percent()).unwrap_err();
        assert_eq!(err, ValidationError::NoLineItems);

        // Types that allow empty documents just get zero totals
        let lenient = CalculationPolicy {
            tax_rate: Decimal::ZERO,
            requires_line_items: false,
        };
        let mut doc = invoice("USD", vec![]);
        recalculate(&mut doc, &lenient).unwrap();
        assert_eq!(doc.totals().grand_total, Decimal::ZERO);
    }
}
