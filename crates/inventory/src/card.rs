use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardvault_core::{CardId, DomainError, Entity, OrderId, ProductId, Secret};

/// Card status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Available,
    Locked,
    Sold,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Available => "available",
            CardStatus::Locked => "locked",
            CardStatus::Sold => "sold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(CardStatus::Available),
            "locked" => Some(CardStatus::Locked),
            "sold" => Some(CardStatus::Sold),
            _ => None,
        }
    }
}

impl core::fmt::Display for CardStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One redeemable secret in the sellable pool.
///
/// Invariant: `order_id` is set iff the status is `Locked` or `Sold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub product_id: ProductId,
    pub secret: Secret,
    pub status: CardStatus,
    pub order_id: Option<OrderId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,
}

impl Entity for Card {
    type Id = CardId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Card {
    /// A freshly imported card.
    pub fn available(product_id: ProductId, secret: impl Into<Secret>) -> Self {
        Self {
            id: CardId::new(),
            product_id,
            secret: secret.into(),
            status: CardStatus::Available,
            order_id: None,
            locked_at: None,
            sold_at: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == CardStatus::Available
    }

    pub fn is_locked_by(&self, order_id: OrderId) -> bool {
        self.status == CardStatus::Locked && self.order_id == Some(order_id)
    }

    pub fn is_sold_to(&self, order_id: OrderId) -> bool {
        self.status == CardStatus::Sold && self.order_id == Some(order_id)
    }

    /// available → locked against `order_id`.
    pub fn lock(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != CardStatus::Available {
            return Err(DomainError::invariant(format!(
                "card {} is {}, only available cards can be locked",
                self.id, self.status
            )));
        }
        self.status = CardStatus::Locked;
        self.order_id = Some(order_id);
        self.locked_at = Some(now);
        Ok(())
    }

    /// locked → sold. The secret becomes disclosable from here on.
    pub fn sell(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != CardStatus::Locked {
            return Err(DomainError::invariant(format!(
                "card {} is {}, only locked cards can be sold",
                self.id, self.status
            )));
        }
        self.status = CardStatus::Sold;
        self.sold_at = Some(now);
        Ok(())
    }

    /// locked → available, clearing the reservation.
    pub fn release(&mut self) -> Result<(), DomainError> {
        if self.status != CardStatus::Locked {
            return Err(DomainError::invariant(format!(
                "card {} is {}, only locked cards can be released",
                self.id, self.status
            )));
        }
        self.clear();
        Ok(())
    }

    /// sold → available after an approved refund.
    ///
    /// The secret was already shown to the original buyer and becomes sellable
    /// again; callers are expected to audit this.
    pub fn return_to_pool(&mut self) -> Result<(), DomainError> {
        if self.status != CardStatus::Sold {
            return Err(DomainError::invariant(format!(
                "card {} is {}, only sold cards can be returned to the pool",
                self.id, self.status
            )));
        }
        self.clear();
        Ok(())
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let holds_order = matches!(self.status, CardStatus::Locked | CardStatus::Sold);
        if holds_order != self.order_id.is_some() {
            return Err(DomainError::invariant(format!(
                "card {} is {} but order_id is {:?}",
                self.id, self.status, self.order_id
            )));
        }
        Ok(())
    }

    /// Buyer-facing view; the secret is only present once sold.
    pub fn view(&self) -> CardView {
        CardView {
            id: self.id,
            status: self.status,
            secret: (self.status == CardStatus::Sold).then(|| self.secret.clone()),
        }
    }

    fn clear(&mut self) {
        self.status = CardStatus::Available;
        self.order_id = None;
        self.locked_at = None;
        self.sold_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardView {
    pub id: CardId,
    pub status: CardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
}
