//! Column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Pricing tiers, keyed by `tier_id`.
    pub const TIERS: &str = "tiers";

    /// Bulk credit packages, keyed by `package_id`.
    pub const PACKAGES: &str = "packages";

    /// Versioned top-up settings, keyed by `user_id`.
    pub const TOPUP_SETTINGS: &str = "topup_settings";

    /// Versioned alert settings, keyed by `user_id`.
    pub const ALERT_SETTINGS: &str = "alert_settings";

    /// Current balances, keyed by `user_id`. Value is a big-endian `i64`.
    pub const BALANCES: &str = "balances";

    /// Ledger, keyed by `user_id || transaction_id`.
    pub const TRANSACTIONS: &str = "transactions";

    /// Top-up attempts, keyed by `user_id || topup_id`.
    pub const TOPUP_RECORDS: &str = "topup_records";

    /// Alert deliveries, keyed by `user_id || alert_event_id`.
    pub const ALERT_RECORDS: &str = "alert_records";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::TIERS,
        cf::PACKAGES,
        cf::TOPUP_SETTINGS,
        cf::ALERT_SETTINGS,
        cf::BALANCES,
        cf::TRANSACTIONS,
        cf::TOPUP_RECORDS,
        cf::ALERT_RECORDS,
    ]
}
