//! Plan catalog and upgrade suggestions.

use std::fmt;
use std::str::FromStr;

use gallery_storage_common::BYTES_PER_GB;
use serde::{Deserialize, Serialize};

/// Subscription length of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanDuration {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "12m")]
    TwelveMonths,
}

impl PlanDuration {
    /// Persisted form: "1m", "3m" or "12m".
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanDuration::OneMonth => "1m",
            PlanDuration::ThreeMonths => "3m",
            PlanDuration::TwelveMonths => "12m",
        }
    }

    /// Length in months.
    pub fn months(&self) -> u32 {
        match self {
            PlanDuration::OneMonth => 1,
            PlanDuration::ThreeMonths => 3,
            PlanDuration::TwelveMonths => 12,
        }
    }
}

impl fmt::Display for PlanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(PlanDuration::OneMonth),
            "3m" => Ok(PlanDuration::ThreeMonths),
            "12m" => Ok(PlanDuration::TwelveMonths),
            other => Err(format!("unknown plan duration: {}", other)),
        }
    }
}

/// The plan a gallery is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSelection {
    /// Catalog key, e.g. "10GB-3m".
    pub plan_key: String,
    /// Subscription length.
    pub duration: PlanDuration,
}

impl PlanSelection {
    /// Create a plan selection.
    pub fn new(plan_key: impl Into<String>, duration: PlanDuration) -> Self {
        Self {
            plan_key: plan_key.into(),
            duration,
        }
    }
}

/// A purchasable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTier {
    /// Catalog key.
    pub key: String,
    /// Subscription length.
    pub duration: PlanDuration,
    /// Originals storage ceiling.
    pub storage_limit_bytes: u64,
    /// List price in cents, with client selection enabled.
    pub price_cents: u64,
}

impl PlanTier {
    /// Create a tier sized in whole gigabytes, keyed "{gb}GB-{duration}".
    pub fn gigabytes(gb: u64, duration: PlanDuration, price_cents: u64) -> Self {
        Self {
            key: format!("{}GB-{}", gb, duration),
            duration,
            storage_limit_bytes: gb.saturating_mul(BYTES_PER_GB),
            price_cents,
        }
    }
}

/// A suggested plan upgrade, priced for the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSuggestion {
    pub plan_key: String,
    pub duration: PlanDuration,
    pub storage_limit_bytes: u64,
    /// Price after the gallery's discount, in cents.
    pub price_cents: u64,
    /// Whether the selection-disabled discount was applied.
    pub discounted: bool,
}

/// Default discount for galleries without client selection.
pub const DEFAULT_SELECTION_DISABLED_DISCOUNT_PERCENT: u8 = 20;

/// Available plans and pricing rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalog {
    tiers: Vec<PlanTier>,
    selection_disabled_discount_percent: u8,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        use PlanDuration::*;

        Self::new(
            vec![
                PlanTier::gigabytes(1, OneMonth, 500),
                PlanTier::gigabytes(1, ThreeMonths, 1200),
                PlanTier::gigabytes(1, TwelveMonths, 3900),
                PlanTier::gigabytes(3, OneMonth, 900),
                PlanTier::gigabytes(3, ThreeMonths, 2400),
                PlanTier::gigabytes(3, TwelveMonths, 7900),
                PlanTier::gigabytes(10, OneMonth, 1900),
                PlanTier::gigabytes(10, ThreeMonths, 4900),
                PlanTier::gigabytes(10, TwelveMonths, 14900),
                PlanTier::gigabytes(25, OneMonth, 3900),
                PlanTier::gigabytes(25, ThreeMonths, 9900),
                PlanTier::gigabytes(25, TwelveMonths, 29900),
            ],
            DEFAULT_SELECTION_DISABLED_DISCOUNT_PERCENT,
        )
    }
}

impl PlanCatalog {
    /// Create a catalog.
    ///
    /// # Arguments
    /// * `tiers` - Purchasable plans
    /// * `selection_disabled_discount_percent` - Discount for galleries without client selection
    pub fn new(tiers: Vec<PlanTier>, selection_disabled_discount_percent: u8) -> Self {
        Self {
            tiers,
            selection_disabled_discount_percent: selection_disabled_discount_percent.min(100),
        }
    }

    /// All tiers.
    pub fn tiers(&self) -> &[PlanTier] {
        &self.tiers
    }

    /// Look up a tier by key.
    pub fn find(&self, key: &str) -> Option<&PlanTier> {
        self.tiers.iter().find(|t| t.key == key)
    }

    /// Price a tier for a gallery.
    ///
    /// # Arguments
    /// * `tier` - Plan to price
    /// * `selection_enabled` - Galleries without client selection get the discount
    pub fn price_cents(&self, tier: &PlanTier, selection_enabled: bool) -> u64 {
        if selection_enabled {
            tier.price_cents
        } else {
            let keep_percent: u64 =
                u64::from(100u8.saturating_sub(self.selection_disabled_discount_percent));
            tier.price_cents.saturating_mul(keep_percent) / 100
        }
    }

    /// Cheapest upgrade that fits `projected_bytes`.
    ///
    /// With a current plan: among tiers of the same duration whose ceiling is
    /// strictly above `current_limit_bytes` and at least `projected_bytes`,
    /// the smallest; otherwise the largest tier of that duration. Without a
    /// plan: the smallest tier of any duration that fits, otherwise the
    /// largest overall. Equal ceilings resolve to the lower price.
    ///
    /// # Arguments
    /// * `projected_bytes` - Usage the plan must accommodate
    /// * `current` - Current plan, if one is chosen
    /// * `current_limit_bytes` - Current ceiling; looked up from the catalog if `None`
    /// * `selection_enabled` - Pricing eligibility
    pub fn suggest_upgrade(
        &self,
        projected_bytes: u64,
        current: Option<&PlanSelection>,
        current_limit_bytes: Option<u64>,
        selection_enabled: bool,
    ) -> Option<TierSuggestion> {
        let chosen: Option<&PlanTier> = match current {
            Some(plan) => {
                let current_ceiling: u64 = current_limit_bytes
                    .or_else(|| self.find(&plan.plan_key).map(|t| t.storage_limit_bytes))
                    .unwrap_or(0);
                let same_duration = || self.tiers.iter().filter(|t| t.duration == plan.duration);

                same_duration()
                    .filter(|t| {
                        t.storage_limit_bytes > current_ceiling
                            && t.storage_limit_bytes >= projected_bytes
                    })
                    .min_by_key(|t| (t.storage_limit_bytes, t.price_cents))
                    .or_else(|| largest(same_duration()))
            }
            None => self
                .tiers
                .iter()
                .filter(|t| t.storage_limit_bytes >= projected_bytes)
                .min_by_key(|t| (t.storage_limit_bytes, t.price_cents))
                .or_else(|| largest(self.tiers.iter())),
        };

        chosen.map(|tier| TierSuggestion {
            plan_key: tier.key.clone(),
            duration: tier.duration,
            storage_limit_bytes: tier.storage_limit_bytes,
            price_cents: self.price_cents(tier, selection_enabled),
            discounted: !selection_enabled && self.selection_disabled_discount_percent > 0,
        })
    }
}

fn largest<'a>(tiers: impl Iterator<Item = &'a PlanTier>) -> Option<&'a PlanTier> {
    tiers.max_by_key(|t| (t.storage_limit_bytes, std::cmp::Reverse(t.price_cents)))
}
