//! Storage keys of the ledger namespace.
//!
//! ```text
//! data keys      purchases sales payments receipts inventory
//!                suppliers customers brokers agents transporters masters
//!                locations currentFinancialYear financialYears
//! backup keys    emergencyBackup emergencyBackupMirror emergencyBackupTime
//!                preFormatBackup
//! internal       ledgerIntent:<id>
//! ```

use mandi_core::PartyType;

pub const PURCHASES: &str = "purchases";
pub const SALES: &str = "sales";
pub const PAYMENTS: &str = "payments";
pub const RECEIPTS: &str = "receipts";
pub const INVENTORY: &str = "inventory";
pub const SUPPLIERS: &str = "suppliers";
pub const CUSTOMERS: &str = "customers";
pub const BROKERS: &str = "brokers";
pub const AGENTS: &str = "agents";
pub const TRANSPORTERS: &str = "transporters";
/// Legacy combined master list, carried through backups untouched.
pub const MASTERS: &str = "masters";
pub const LOCATIONS: &str = "locations";
pub const CURRENT_FINANCIAL_YEAR: &str = "currentFinancialYear";
pub const FINANCIAL_YEARS: &str = "financialYears";

pub const EMERGENCY_BACKUP: &str = "emergencyBackup";
pub const EMERGENCY_BACKUP_MIRROR: &str = "emergencyBackupMirror";
pub const EMERGENCY_BACKUP_TIME: &str = "emergencyBackupTime";
pub const PRE_FORMAT_BACKUP: &str = "preFormatBackup";

/// Prefix of per-operation intent keys. The bare key is read for older data.
pub const LEDGER_INTENT: &str = "ledgerIntent";

/// Every key that holds ledger data (exported, imported, cleared).
pub const DATA_KEYS: [&str; 14] = [
    PURCHASES,
    SALES,
    PAYMENTS,
    RECEIPTS,
    INVENTORY,
    SUPPLIERS,
    CUSTOMERS,
    BROKERS,
    AGENTS,
    TRANSPORTERS,
    MASTERS,
    LOCATIONS,
    CURRENT_FINANCIAL_YEAR,
    FINANCIAL_YEARS,
];

/// Keys cleared by a master-data reset.
pub const MASTER_KEYS: [&str; 7] = [SUPPLIERS, CUSTOMERS, BROKERS, AGENTS, TRANSPORTERS, MASTERS, LOCATIONS];

/// Keys the write-coalescing store loads at construction.
pub const HOT_KEYS: [&str; 6] = [LOCATIONS, AGENTS, CUSTOMERS, SUPPLIERS, BROKERS, TRANSPORTERS];

/// Storage key of a master type's collection.
pub fn master_key(party_type: PartyType) -> &'static str {
    match party_type {
        PartyType::Supplier => SUPPLIERS,
        PartyType::Customer => CUSTOMERS,
        PartyType::Broker => BROKERS,
        PartyType::Agent => AGENTS,
        PartyType::Transporter => TRANSPORTERS,
    }
}

pub fn is_data_key(key: &str) -> bool {
    DATA_KEYS.contains(&key)
}

/// Key of one ledger intent.
pub fn intent_key(id: &str) -> String {
    format!("{LEDGER_INTENT}:{id}")
}

pub fn is_intent_key(key: &str) -> bool {
    key.strip_prefix(LEDGER_INTENT)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}
