// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Static credit package catalog.

use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// A purchasable credit package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    /// Price in whole currency units
    pub price: u32,
    pub currency: &'static str,
}

/// The catalog. Package ids must not contain `-` (order reference delimiter).
pub static PACKAGES: [Package; 3] = [
    Package {
        id: "p_trial",
        name: "Trial Pack",
        credits: 5,
        price: 30,
        currency: "TRY",
    },
    Package {
        id: "p_standard",
        name: "Standard Pack",
        credits: 25,
        price: 125,
        currency: "TRY",
    },
    Package {
        id: "p_pro",
        name: "Pro Pack",
        credits: 75,
        price: 300,
        currency: "TRY",
    },
];

impl Package {
    /// Look up a package by id.
    pub fn find(id: &str) -> Option<&'static Package> {
        PACKAGES.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_amounts() {
        assert_eq!(Package::find("p_trial").map(|p| p.credits), Some(5));
        assert_eq!(Package::find("p_standard").map(|p| p.credits), Some(25));
        assert_eq!(Package::find("p_pro").map(|p| (p.credits, p.price)), Some((75, 300)));
        assert!(Package::find("p_unknown").is_none());
    }

    #[test]
    fn package_ids_are_order_reference_safe() {
        for package in PACKAGES.iter() {
            assert!(!package.id.contains('-'), "{} contains '-'", package.id);
        }
    }
}
