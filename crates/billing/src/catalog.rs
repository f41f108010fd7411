//! Package catalog
//!
//! Read-only table of purchasable coin bundles and premium subscriptions.
//! Built once at startup, validated, then shared as `Arc<PackageCatalog>`.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{BillingError, BillingResult};

/// Billing interval of a subscription package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse package classification, used for checkout mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    CurrencyBundle,
    SubscriptionMonthly,
    SubscriptionYearly,
}

impl PackageKind {
    pub fn is_subscription(&self) -> bool {
        !matches!(self, PackageKind::CurrencyBundle)
    }
}

/// What a package grants once paid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOffer {
    CurrencyBundle {
        /// Coins credited to the buyer
        currency_amount: i64,
        /// Struck-through "was" price shown in the shop
        original_price_minor_units: Option<i64>,
        is_popular: bool,
        bonus_description: Option<String>,
    },
    Subscription {
        interval: BillingInterval,
        features: Vec<String>,
    },
}

/// A purchasable package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: String,
    pub display_name: String,
    pub price_minor_units: i64,
    pub currency_code: String,
    /// Stripe price ID; `None` until provisioned
    pub vendor_price_ref: Option<String>,
    pub offer: PackageOffer,
}

impl Package {
    pub fn currency_bundle(
        id: &str,
        display_name: &str,
        currency_amount: i64,
        price_minor_units: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            price_minor_units,
            currency_code: "eur".to_string(),
            vendor_price_ref: None,
            offer: PackageOffer::CurrencyBundle {
                currency_amount,
                original_price_minor_units: None,
                is_popular: false,
                bonus_description: None,
            },
        }
    }

    pub fn subscription(
        id: &str,
        display_name: &str,
        price_minor_units: i64,
        interval: BillingInterval,
        features: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            price_minor_units,
            currency_code: "eur".to_string(),
            vendor_price_ref: None,
            offer: PackageOffer::Subscription {
                interval,
                features: features.iter().map(|f| f.to_string()).collect(),
            },
        }
    }

    pub fn with_price_ref(mut self, price_ref: &str) -> Self {
        self.vendor_price_ref = Some(price_ref.to_string());
        self
    }

    pub fn with_original_price(mut self, original: i64) -> Self {
        if let PackageOffer::CurrencyBundle {
            original_price_minor_units,
            ..
        } = &mut self.offer
        {
            *original_price_minor_units = Some(original);
        }
        self
    }

    pub fn with_bonus(mut self, bonus: &str) -> Self {
        if let PackageOffer::CurrencyBundle {
            bonus_description, ..
        } = &mut self.offer
        {
            *bonus_description = Some(bonus.to_string());
        }
        self
    }

    pub fn popular(mut self) -> Self {
        if let PackageOffer::CurrencyBundle { is_popular, .. } = &mut self.offer {
            *is_popular = true;
        }
        self
    }

    pub fn kind(&self) -> PackageKind {
        match &self.offer {
            PackageOffer::CurrencyBundle { .. } => PackageKind::CurrencyBundle,
            PackageOffer::Subscription {
                interval: BillingInterval::Month,
                ..
            } => PackageKind::SubscriptionMonthly,
            PackageOffer::Subscription {
                interval: BillingInterval::Year,
                ..
            } => PackageKind::SubscriptionYearly,
        }
    }

    /// Coins granted, for currency bundles
    pub fn currency_amount(&self) -> Option<i64> {
        match &self.offer {
            PackageOffer::CurrencyBundle {
                currency_amount, ..
            } => Some(*currency_amount),
            PackageOffer::Subscription { .. } => None,
        }
    }

    pub fn interval(&self) -> Option<BillingInterval> {
        match &self.offer {
            PackageOffer::Subscription { interval, .. } => Some(*interval),
            PackageOffer::CurrencyBundle { .. } => None,
        }
    }

    /// The Stripe price reference, or `PackageNotProvisioned` when missing or blank
    pub fn require_price_ref(&self) -> BillingResult<&str> {
        match self.vendor_price_ref.as_deref().map(str::trim) {
            Some(price) if !price.is_empty() => Ok(price),
            _ => Err(BillingError::PackageNotProvisioned(self.id.clone())),
        }
    }
}

/// Immutable package table with O(1) lookup by id or legacy alias
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    packages: Vec<Package>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
}

impl PackageCatalog {
    /// Build a catalog, rejecting duplicate ids, blank names and non-positive prices
    pub fn new(packages: Vec<Package>) -> BillingResult<Self> {
        let mut index = HashMap::with_capacity(packages.len());

        for (position, package) in packages.iter().enumerate() {
            if package.id.trim().is_empty() {
                return Err(BillingError::InvalidCatalog(format!(
                    "package at position {} has an empty id",
                    position
                )));
            }
            if package.display_name.trim().is_empty() {
                return Err(BillingError::InvalidCatalog(format!(
                    "package {} has an empty display name",
                    package.id
                )));
            }
            if package.price_minor_units <= 0 {
                return Err(BillingError::InvalidCatalog(format!(
                    "package {} has non-positive price {}",
                    package.id, package.price_minor_units
                )));
            }
            if let Some(amount) = package.currency_amount() {
                if amount <= 0 {
                    return Err(BillingError::InvalidCatalog(format!(
                        "package {} grants non-positive amount {}",
                        package.id, amount
                    )));
                }
            }
            if index.insert(package.id.clone(), position).is_some() {
                return Err(BillingError::InvalidCatalog(format!(
                    "duplicate package id {}",
                    package.id
                )));
            }
        }

        Ok(Self {
            packages,
            index,
            aliases: HashMap::new(),
        })
    }

    /// Register an alternative id that resolves to an existing package
    pub fn with_alias(mut self, alias: &str, target: &str) -> BillingResult<Self> {
        if self.index.contains_key(alias) {
            return Err(BillingError::InvalidCatalog(format!(
                "alias {} shadows a package id",
                alias
            )));
        }
        let position = *self.index.get(target).ok_or_else(|| {
            BillingError::InvalidCatalog(format!("alias {} points at unknown package {}", alias, target))
        })?;
        self.aliases.insert(alias.to_string(), position);
        Ok(self)
    }

    /// Replace Stripe price references, keyed by package id. Unknown ids are rejected.
    pub fn with_price_overrides<I>(mut self, overrides: I) -> BillingResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (package_id, price_ref) in overrides {
            let position = *self.index.get(&package_id).ok_or_else(|| {
                BillingError::InvalidCatalog(format!(
                    "price override for unknown package {}",
                    package_id
                ))
            })?;
            let price_ref = price_ref.trim();
            self.packages[position].vendor_price_ref = if price_ref.is_empty() {
                None
            } else {
                Some(price_ref.to_string())
            };
        }
        Ok(self)
    }

    /// The shop's standard coin bundles and premium plans
    pub fn standard() -> BillingResult<Self> {
        let packages = vec![
            Package::currency_bundle("starter", "Starter Pack", 500, 500)
                .with_bonus("Perfect om te beginnen")
                .with_price_ref("price_1RYRN5IhYvmNDX3MGOMM0xEQ"),
            Package::currency_bundle("popular", "Popular Choice", 1200, 1000)
                .with_original_price(1200)
                .with_bonus("+20% Bonus Coins!")
                .popular()
                .with_price_ref("price_1RYRN5IhYvmNDX3MpkT6nseC"),
            Package::currency_bundle("value", "Value Bundle", 2500, 2000)
                .with_original_price(2500)
                .with_bonus("Best Value Per Coin")
                .with_price_ref("price_1RYRN6IhYvmNDX3MB7R1CfY7"),
            Package::currency_bundle("premium", "Premium Stash", 6500, 5000)
                .with_original_price(7000)
                .with_bonus("Huge Bonus + VIP Tag")
                .with_price_ref("price_1RYRN7IhYvmNDX3M6YOaeTd8"),
            Package::currency_bundle("whale", "Whale Package", 15000, 10000)
                .with_original_price(15000)
                .with_bonus("The Ultimate Experience")
                .with_price_ref("price_1RYRN7IhYvmNDX3MGEf23SSF"),
            Package::subscription(
                "premium_monthly",
                "Premium Maandelijks",
                999,
                BillingInterval::Month,
                &[
                    "Unlimited dealer chats",
                    "Exclusive dealer outfits",
                    "Priority customer support",
                    "Daily bonus coins",
                    "Special VIP status",
                ],
            )
            .with_price_ref("price_1RYRN8IhYvmNDX3MwXFzxQXG"),
            Package::subscription(
                "premium_yearly",
                "Premium Jaarlijks",
                9999,
                BillingInterval::Year,
                &[
                    "Alle Premium voordelen",
                    "2 maanden gratis",
                    "Extra bonus coins",
                    "Exclusive annual rewards",
                    "Premium badge",
                ],
            )
            .with_price_ref("price_1RYRN9IhYvmNDX3M4EHboWuQ"),
        ];

        // Older front-end builds send underscore names
        Self::new(packages)?
            .with_alias("starter_pack", "starter")?
            .with_alias("popular_choice", "popular")?
            .with_alias("value_bundle", "value")?
            .with_alias("premium_stash", "premium")?
            .with_alias("whale_package", "whale")
    }

    pub fn list_packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn get_package(&self, id: &str) -> BillingResult<&Package> {
        self.index
            .get(id)
            .or_else(|| self.aliases.get(id))
            .map(|&position| &self.packages[position])
            .ok_or_else(|| BillingError::PackageNotFound(id.to_string()))
    }

    pub fn currency_bundles(&self) -> impl Iterator<Item = &Package> {
        self.packages
            .iter()
            .filter(|p| p.kind() == PackageKind::CurrencyBundle)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| p.kind().is_subscription())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
