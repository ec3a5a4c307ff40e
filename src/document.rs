//! Document Model
//!
//! The mutable business record that moves through a workflow. A document
//! exclusively owns its line items; item amounts and document totals are
//! computed fields written only by the calculator (crate-private writes,
//! public reads), so they can never drift from their inputs except through
//! a recompute.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A business document progressing through a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document ID
    pub document_id: Uuid,
    /// Document type (e.g. "sales_invoice"), keys into configuration
    pub doc_type: String,

    /// Current state in the workflow state machine
    pub current_state: String,
    /// When the current state was entered
    pub state_entered_at: DateTime<Utc>,

    /// Owning actor (the document's author)
    pub owner: Uuid,
    /// Company/tenant this document belongs to
    pub company: String,
    /// Counterparty name, if any (customer, supplier)
    #[serde(default)]
    pub counterparty: Option<String>,

    /// Document currency code (ISO 4217)
    pub currency: String,
    /// Rate from document currency to company base currency
    pub conversion_rate: Decimal,

    /// Ordered line items, exclusively owned by this document
    pub line_items: Vec<LineItem>,

    /// Computed totals; valid only while `totals_stale` is false
    pub(crate) totals: DocumentTotals,
    /// Set by any mutation of numeric inputs, cleared by recompute
    #[serde(default)]
    pub totals_stale: bool,

    /// Links to related documents (kept in sync on state change)
    #[serde(default)]
    pub links: Vec<DocumentLink>,

    /// History of state changes
    pub history: Vec<StateChange>,

    /// Optimistic-concurrency version, bumped by the store on save
    pub version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document in the given initial state
    pub fn new(
        doc_type: impl Into<String>,
        initial_state: impl Into<String>,
        owner: Uuid,
        company: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id: Uuid::new_v4(),
            doc_type: doc_type.into(),
            current_state: initial_state.into(),
            state_entered_at: now,
            owner,
            company: company.into(),
            counterparty: None,
            currency: currency.into(),
            conversion_rate: Decimal::ONE,
            line_items: Vec::new(),
            totals: DocumentTotals::default(),
            totals_stale: true,
            links: Vec::new(),
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the conversion rate to company currency
    pub fn with_conversion_rate(mut self, rate: Decimal) -> Self {
        self.conversion_rate = rate;
        self.totals_stale = true;
        self
    }

    /// Set the counterparty
    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = Some(counterparty.into());
        self
    }

    /// Append a line item
    pub fn with_line_item(mut self, item: LineItem) -> Self {
        self.add_line_item(item);
        self
    }

    /// Add a link to a related document
    pub fn with_link(mut self, link_type: impl Into<String>, document_id: Uuid) -> Self {
        self.links.push(DocumentLink {
            link_type: link_type.into(),
            document_id,
        });
        self
    }

    /// Append a line item, marking totals stale
    pub fn add_line_item(&mut self, item: LineItem) {
        self.line_items.push(item);
        self.mark_mutated();
    }

    /// Replace all line items, marking totals stale
    pub fn set_line_items(&mut self, items: Vec<LineItem>) {
        self.line_items = items;
        self.mark_mutated();
    }

    /// Change the conversion rate, marking totals stale
    pub fn set_conversion_rate(&mut self, rate: Decimal) {
        self.conversion_rate = rate;
        self.mark_mutated();
    }

    /// Read access to the computed totals
    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    /// Record a state change and append it to the embedded history
    pub(crate) fn transition_to(
        &mut self,
        to_state: String,
        action: &str,
        changed_by: Uuid,
        comment: Option<String>,
    ) {
        let from_state = std::mem::replace(&mut self.current_state, to_state.clone());
        let now = Utc::now();

        self.history.push(StateChange {
            from_state,
            to_state,
            action: action.to_string(),
            changed_at: now,
            changed_by,
            comment,
        });

        self.state_entered_at = now;
        self.updated_at = now;
    }

    fn mark_mutated(&mut self) {
        self.totals_stale = true;
        self.updated_at = Utc::now();
    }
}

/// A single document line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    /// Item reference (SKU, service code, ...)
    pub item: String,
    /// Quantity, must be > 0
    pub qty: Decimal,
    /// Unit rate in document currency, must be >= 0
    pub rate: Decimal,
    /// Computed: qty * rate, in document currency
    pub(crate) amount: Decimal,
    /// Computed: amount * conversion_rate, in company currency
    pub(crate) base_amount: Decimal,
}

impl LineItem {
    pub fn new(item: impl Into<String>, qty: Decimal, rate: Decimal) -> Self {
        Self {
            item: item.into(),
            qty,
            rate,
            amount: Decimal::ZERO,
            base_amount: Decimal::ZERO,
        }
    }

    /// Computed line amount (qty * rate)
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Computed line amount in company currency
    pub fn base_amount(&self) -> Decimal {
        self.base_amount
    }
}

/// Computed monetary totals for a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentTotals {
    /// Sum of line quantities
    pub total_qty: Decimal,
    /// Sum of line amounts, document currency
    pub net_total: Decimal,
    /// Sum of line base amounts, company currency
    pub base_total: Decimal,
    /// Tax on net_total
    pub taxes: Decimal,
    /// Tax in company currency
    pub base_taxes: Decimal,
    /// net_total + taxes
    pub grand_total: Decimal,
    /// base_total + base_taxes
    pub base_grand_total: Decimal,
    /// grand_total rounded to the currency's minor unit, half-to-even
    pub rounded_total: Decimal,
    /// rounded_total - grand_total, carried explicitly
    pub rounding_adjustment: Decimal,
}

/// Record of a single state change, embedded in the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    /// State changed from
    pub from_state: String,
    /// State changed to
    pub to_state: String,
    /// Action that caused the change
    pub action: String,
    /// When the change occurred
    pub changed_at: DateTime<Utc>,
    /// Actor who triggered the change
    pub changed_by: Uuid,
    /// Optional comment supplied with the request
    pub comment: Option<String>,
}

/// Reference to a related document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    /// Relationship kind (e.g. "sales_order", "delivery_note")
    pub link_type: String,
    /// The linked document
    pub document_id: Uuid,
}
