//! CSV format handling for replay operations and account output
//!
//! Centralizes the file formats the replay surface speaks:
//!
//! - operations file: `op,account,counterparty,amount,fee,category,key,reference`
//! - account seed file: `account,owner,balance,daily_limit,monthly_limit,status`
//! - account state output: `account,owner,balance,daily_spent,status`
//!
//! Amounts are integer minor units throughout; no decimal parsing, no
//! rounding. Conversion functions are pure for easy testing.

use std::io::Write;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::types::{
    Account, AccountId, AccountStatus, MinorUnits, TransactionId,
};

/// Raw operations-file row
///
/// Column presence depends on `op`; validation happens in
/// [`convert_operation`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationCsvRecord {
    /// Operation name: topup, pay, transfer, refund, cashback, settle_ok,
    /// settle_fail
    pub op: String,
    /// Primary account (payer for pay, source for transfer)
    pub account: Option<String>,
    /// Counterparty (merchant for pay, destination for transfer)
    pub counterparty: Option<String>,
    /// Amount in minor units
    pub amount: Option<String>,
    /// Merchant fee in minor units (pay only)
    pub fee: Option<String>,
    /// Spending category (pay/cashback)
    pub category: Option<String>,
    /// Idempotency key (topup/settlements; original tx id for refund)
    pub key: Option<String>,
    /// Processor reference (settlements) or original transaction (refund)
    pub reference: Option<String>,
}

/// A parsed replay operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Credit a wallet
    Topup {
        account: AccountId,
        amount: MinorUnits,
        key: Option<String>,
    },
    /// Pay a merchant
    Pay {
        payer: AccountId,
        merchant: AccountId,
        amount: MinorUnits,
        fee: MinorUnits,
        category: Option<String>,
        key: Option<String>,
    },
    /// Move value between wallets
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: MinorUnits,
    },
    /// Reverse (part of) a completed payment
    Refund {
        original: TransactionId,
        amount: MinorUnits,
    },
    /// Platform-funded reward
    Cashback {
        account: AccountId,
        amount: MinorUnits,
        category: Option<String>,
    },
    /// Successful processor settlement
    SettleOk {
        account: AccountId,
        amount: MinorUnits,
        key: String,
        reference: String,
    },
    /// Failed processor settlement
    SettleFail {
        account: AccountId,
        amount: MinorUnits,
        key: String,
        reference: String,
    },
}

impl Operation {
    /// Key used to partition a batch while preserving per-account order
    ///
    /// Refunds partition by their original transaction id: every refund
    /// against one payment lands in the same partition, so cumulative-cap
    /// checks see them in file order.
    pub fn partition_key(&self) -> Uuid {
        match self {
            Operation::Topup { account, .. }
            | Operation::Pay { payer: account, .. }
            | Operation::Transfer { from: account, .. }
            | Operation::Cashback { account, .. }
            | Operation::SettleOk { account, .. }
            | Operation::SettleFail { account, .. } => *account,
            Operation::Refund { original, .. } => *original,
        }
    }
}

fn parse_uuid(field: &str, value: Option<&String>) -> Result<Uuid, String> {
    let raw = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {field}"))?;
    Uuid::from_str(raw).map_err(|_| format!("invalid {field} '{raw}'"))
}

fn parse_amount(value: Option<&String>) -> Result<MinorUnits, String> {
    let raw = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing amount".to_string())?;
    let amount: MinorUnits = raw
        .parse()
        .map_err(|_| format!("invalid amount '{raw}' (expected integer minor units)"))?;
    if amount <= 0 {
        return Err(format!("amount must be positive, got {amount}"));
    }
    Ok(amount)
}

fn optional_text(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Convert a raw CSV row into a domain operation
///
/// Validates column presence per operation and rejects non-positive or
/// non-integer amounts.
pub fn convert_operation(record: OperationCsvRecord) -> Result<Operation, String> {
    match record.op.trim().to_lowercase().as_str() {
        "topup" => Ok(Operation::Topup {
            account: parse_uuid("account", record.account.as_ref())?,
            amount: parse_amount(record.amount.as_ref())?,
            key: optional_text(record.key.as_ref()),
        }),
        "pay" => {
            let fee = match record.fee.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
                Some(raw) => raw
                    .parse::<MinorUnits>()
                    .map_err(|_| format!("invalid fee '{raw}'"))?,
                None => 0,
            };
            Ok(Operation::Pay {
                payer: parse_uuid("account", record.account.as_ref())?,
                merchant: parse_uuid("counterparty", record.counterparty.as_ref())?,
                amount: parse_amount(record.amount.as_ref())?,
                fee,
                category: optional_text(record.category.as_ref()),
                key: optional_text(record.key.as_ref()),
            })
        }
        "transfer" => Ok(Operation::Transfer {
            from: parse_uuid("account", record.account.as_ref())?,
            to: parse_uuid("counterparty", record.counterparty.as_ref())?,
            amount: parse_amount(record.amount.as_ref())?,
        }),
        "refund" => Ok(Operation::Refund {
            original: parse_uuid("reference", record.reference.as_ref())?,
            amount: parse_amount(record.amount.as_ref())?,
        }),
        "cashback" => Ok(Operation::Cashback {
            account: parse_uuid("account", record.account.as_ref())?,
            amount: parse_amount(record.amount.as_ref())?,
            category: optional_text(record.category.as_ref()),
        }),
        op @ ("settle_ok" | "settle_fail") => {
            let account = parse_uuid("account", record.account.as_ref())?;
            let amount = parse_amount(record.amount.as_ref())?;
            let key = optional_text(record.key.as_ref())
                .ok_or_else(|| "settlements require a key".to_string())?;
            let reference = optional_text(record.reference.as_ref())
                .ok_or_else(|| "settlements require a reference".to_string())?;
            if op == "settle_ok" {
                Ok(Operation::SettleOk {
                    account,
                    amount,
                    key,
                    reference,
                })
            } else {
                Ok(Operation::SettleFail {
                    account,
                    amount,
                    key,
                    reference,
                })
            }
        }
        other => Err(format!("unknown operation '{other}'")),
    }
}

/// Raw seed-file row
#[derive(Debug, Clone, Deserialize)]
pub struct SeedCsvRecord {
    /// Account id
    pub account: String,
    /// Owner id
    pub owner: String,
    /// Opening balance in minor units
    pub balance: MinorUnits,
    /// Daily spend limit in minor units
    pub daily_limit: MinorUnits,
    /// Monthly spend limit in minor units
    pub monthly_limit: MinorUnits,
    /// active, frozen or closed
    pub status: Option<String>,
}

/// Build an account from a seed row
pub fn convert_seed(
    record: &SeedCsvRecord,
    currency: &str,
    now: DateTime<Utc>,
) -> Result<Account, String> {
    let id = Uuid::from_str(record.account.trim())
        .map_err(|_| format!("invalid account id '{}'", record.account))?;
    let owner = Uuid::from_str(record.owner.trim())
        .map_err(|_| format!("invalid owner id '{}'", record.owner))?;
    if record.balance < 0 {
        return Err(format!("negative seed balance for {id}"));
    }
    let status = match record.status.as_deref().map(str::trim) {
        None | Some("") | Some("active") => AccountStatus::Active,
        Some("frozen") => AccountStatus::Frozen,
        Some("closed") => AccountStatus::Closed,
        Some(other) => return Err(format!("unknown status '{other}' for {id}")),
    };

    let mut account = Account::new(
        id,
        owner,
        currency,
        record.daily_limit,
        record.monthly_limit,
        now,
    );
    account.balance = record.balance;
    account.status = status;
    Ok(account)
}

/// Read a seed file into accounts
pub fn read_seed_csv(
    path: &std::path::Path,
    currency: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Account>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("failed to open seed file: {e}"))?;

    let mut accounts = Vec::new();
    for row in reader.deserialize::<SeedCsvRecord>() {
        let record = row.map_err(|e| format!("seed parse error: {e}"))?;
        accounts.push(convert_seed(&record, currency, now)?);
    }
    Ok(accounts)
}

/// Write final account states as CSV, sorted by account id
pub fn write_accounts_csv(
    accounts: &[Account],
    output: &mut dyn Write,
) -> Result<(), std::io::Error> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["account", "owner", "balance", "daily_spent", "status"])?;
    for account in accounts {
        let status = match account.status {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        };
        writer.write_record([
            account.id.to_string(),
            account.owner.to_string(),
            account.balance.to_string(),
            account.daily.spent.to_string(),
            status.to_string(),
        ])?;
    }
    writer.flush()
}
