use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use uuid::Uuid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SeedService {
        service: Service,
    },
    RetireService {
        id: Uuid,
    },
    UpsertCustomer {
        id: Uuid,
        profile: Profile,
    },
    UpsertVendor {
        id: Uuid,
        profile: Profile,
    },
    UpsertOffering {
        vendor_id: Uuid,
        offering: Offering,
    },
    UpdateOffering {
        vendor_id: Uuid,
        service_id: Uuid,
        price_cents: Option<i64>,
        duration_min: Option<u32>,
        active: Option<bool>,
    },
    RemoveOffering {
        vendor_id: Uuid,
        service_id: Uuid,
    },
    AddCartItem {
        item: CartItem,
    },
    RescheduleCartItem {
        id: Uuid,
        customer_id: Uuid,
        preferred_date: NaiveDate,
        preferred_time: NaiveTime,
    },
    RemoveCartItem {
        id: Uuid,
        customer_id: Uuid,
    },
    /// `INSERT INTO booking_groups` converts the customer's cart.
    Checkout {
        group_id: Uuid,
        customer_id: Uuid,
        method: PaymentMethod,
    },
    DeleteGroup {
        group_id: Uuid,
        customer_id: Uuid,
    },
    /// The WHERE clause names the acting side: `vendor_id = ..` makes a
    /// vendor principal, `customer_id = ..` a customer principal.
    SetItemStatus {
        id: Uuid,
        principal: Principal,
        status: ItemStatus,
    },
    SelectSlots {
        vendor_id: Uuid,
        service_id: Uuid,
        date: NaiveDate,
    },
    SelectServices,
    SelectOfferings {
        vendor_id: Uuid,
    },
    SelectCart {
        customer_id: Uuid,
    },
    SelectGroups {
        customer_id: Uuid,
    },
    SelectBookings {
        owner: Principal,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let rest = trimmed[8..].trim().trim_matches(';').trim();
        let channel = match rest {
            "" | "*" => None,
            ch => Some(ch.to_string()),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "services" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("services", 5, values.len()));
            }
            Ok(Command::SeedService {
                service: Service {
                    id: parse_uuid(&values[0], "id")?,
                    name: parse_string(&values[1], "name")?,
                    category: parse_string(&values[2], "category")?,
                    base_price_cents: parse_i64(&values[3], "base_price_cents")?,
                    duration_min: parse_u32(&values[4], "duration_min")?,
                    active: if values.len() >= 6 {
                        parse_bool(&values[5], "active")?
                    } else {
                        true
                    },
                },
            })
        }
        "customers" | "vendors" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("profiles", 2, values.len()));
            }
            let id = parse_uuid(&values[0], "id")?;
            let profile = Profile {
                fullname: parse_string(&values[1], "fullname")?,
                contact_info: if values.len() >= 3 {
                    parse_string(&values[2], "contact_info")?
                } else {
                    String::new()
                },
                address: if values.len() >= 4 {
                    parse_string(&values[3], "address")?
                } else {
                    String::new()
                },
            };
            if table == "customers" {
                Ok(Command::UpsertCustomer { id, profile })
            } else {
                Ok(Command::UpsertVendor { id, profile })
            }
        }
        "offerings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("offerings", 4, values.len()));
            }
            Ok(Command::UpsertOffering {
                vendor_id: parse_uuid(&values[0], "vendor_id")?,
                offering: Offering {
                    service_id: parse_uuid(&values[1], "service_id")?,
                    price_cents: parse_i64(&values[2], "price_cents")?,
                    duration_min: parse_u32(&values[3], "duration_min")?,
                    active: if values.len() >= 5 {
                        parse_bool(&values[4], "active")?
                    } else {
                        true
                    },
                },
            })
        }
        "cart_items" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("cart_items", 6, values.len()));
            }
            Ok(Command::AddCartItem {
                item: CartItem {
                    id: parse_uuid(&values[0], "id")?,
                    customer_id: parse_uuid(&values[1], "customer_id")?,
                    vendor_id: parse_uuid(&values[2], "vendor_id")?,
                    service_id: parse_uuid(&values[3], "service_id")?,
                    preferred_date: parse_date(&values[4], "date")?,
                    preferred_time: parse_time(&values[5], "time")?,
                },
            })
        }
        "booking_groups" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("booking_groups", 2, values.len()));
            }
            Ok(Command::Checkout {
                group_id: parse_uuid(&values[0], "id")?,
                customer_id: parse_uuid(&values[1], "customer_id")?,
                method: if values.len() >= 3 {
                    parse_method(&values[2], "method")?
                } else {
                    PaymentMethod::Cash
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let filters = collect_eq_filters(selection)?;

    match table.as_str() {
        "services" => {
            let id = required_uuid(&filters, "id")?;
            let active = assignments
                .iter()
                .find(|a| assignment_column(a).as_deref() == Some("active"))
                .ok_or(SqlError::Parse("services update supports SET active".into()))?;
            if parse_bool(&active.value, "active")? {
                return Err(SqlError::Unsupported(
                    "services cannot be re-activated".into(),
                ));
            }
            Ok(Command::RetireService { id })
        }
        "offerings" => {
            let vendor_id = required_uuid(&filters, "vendor_id")?;
            let service_id = required_uuid(&filters, "service_id")?;
            let mut price_cents = None;
            let mut duration_min = None;
            let mut active = None;
            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("price_cents") => {
                        price_cents = Some(parse_i64(&a.value, "price_cents")?)
                    }
                    Some("duration_min") => {
                        duration_min = Some(parse_u32(&a.value, "duration_min")?)
                    }
                    Some("active") => active = Some(parse_bool(&a.value, "active")?),
                    _ => {
                        return Err(SqlError::Parse(
                            "offerings update supports price_cents, duration_min, active".into(),
                        ));
                    }
                }
            }
            if price_cents.is_none() && duration_min.is_none() && active.is_none() {
                return Err(SqlError::Parse("offerings update with no assignments".into()));
            }
            Ok(Command::UpdateOffering {
                vendor_id,
                service_id,
                price_cents,
                duration_min,
                active,
            })
        }
        "cart_items" => {
            let id = required_uuid(&filters, "id")?;
            let customer_id = required_uuid(&filters, "customer_id")?;
            let date = assignments
                .iter()
                .find(|a| assignment_column(a).as_deref() == Some("date"))
                .ok_or(SqlError::MissingFilter("date"))?;
            let time = assignments
                .iter()
                .find(|a| assignment_column(a).as_deref() == Some("time"))
                .ok_or(SqlError::MissingFilter("time"))?;
            Ok(Command::RescheduleCartItem {
                id,
                customer_id,
                preferred_date: parse_date(&date.value, "date")?,
                preferred_time: parse_time(&time.value, "time")?,
            })
        }
        "bookings" => {
            let id = required_uuid(&filters, "id")?;
            let principal = extract_principal(&filters)?;
            let status = assignments
                .iter()
                .find(|a| assignment_column(a).as_deref() == Some("status"))
                .ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::SetItemStatus {
                id,
                principal,
                status: parse_status(&status.value, "status")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_eq_filters(&delete.selection)?;

    match table.as_str() {
        "offerings" => Ok(Command::RemoveOffering {
            vendor_id: required_uuid(&filters, "vendor_id")?,
            service_id: required_uuid(&filters, "service_id")?,
        }),
        "cart_items" => Ok(Command::RemoveCartItem {
            id: required_uuid(&filters, "id")?,
            customer_id: required_uuid(&filters, "customer_id")?,
        }),
        "booking_groups" => Ok(Command::DeleteGroup {
            group_id: required_uuid(&filters, "id")?,
            customer_id: required_uuid(&filters, "customer_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_eq_filters(&select.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            vendor_id: required_uuid(&filters, "vendor_id")?,
            service_id: required_uuid(&filters, "service_id")?,
            date: parse_date(
                find_filter(&filters, "date").ok_or(SqlError::MissingFilter("date"))?,
                "date",
            )?,
        }),
        "services" => Ok(Command::SelectServices),
        "offerings" => Ok(Command::SelectOfferings {
            vendor_id: required_uuid(&filters, "vendor_id")?,
        }),
        "cart_items" => Ok(Command::SelectCart {
            customer_id: required_uuid(&filters, "customer_id")?,
        }),
        "booking_groups" => Ok(Command::SelectGroups {
            customer_id: required_uuid(&filters, "customer_id")?,
        }),
        "bookings" => {
            // Pagination rides in the WHERE clause as plain filters;
            // LIMIT/OFFSET proper are reserved words this dialect skips.
            let owner = extract_principal(&filters)?;
            let limit = match find_filter(&filters, "page_size") {
                Some(expr) => Some(parse_usize(expr, "page_size")?),
                None => None,
            };
            let offset = match find_filter(&filters, "page_offset") {
                Some(expr) => Some(parse_usize(expr, "page_offset")?),
                None => None,
            };
            Ok(Command::SelectBookings {
                owner,
                limit,
                offset,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE / helpers ───────────────────────────────────────────

/// Flatten an AND tree of `column = value` terms.
fn collect_eq_filters(selection: &Option<Expr>) -> Result<Vec<(String, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk_eq(expr, &mut out);
    }
    Ok(out)
}

fn walk_eq(expr: &Expr, out: &mut Vec<(String, Expr)>) {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_eq(left, out);
                walk_eq(right, out);
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, (**right).clone()));
                }
            }
            _ => {}
        }
    }
}

fn find_filter<'a>(filters: &'a [(String, Expr)], column: &str) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|(col, _)| col == column)
        .map(|(_, expr)| expr)
}

fn required_uuid(filters: &[(String, Expr)], column: &'static str) -> Result<Uuid, SqlError> {
    let expr = find_filter(filters, column).ok_or(SqlError::MissingFilter(column))?;
    parse_uuid(expr, column)
}

/// `vendor_id = ..` or `customer_id = ..` in a WHERE clause names the
/// acting side; exactly one must be present.
fn extract_principal(filters: &[(String, Expr)]) -> Result<Principal, SqlError> {
    let vendor = find_filter(filters, "vendor_id");
    let customer = find_filter(filters, "customer_id");
    match (vendor, customer) {
        (Some(expr), None) => Ok(Principal {
            role: Role::Vendor,
            id: parse_uuid(expr, "vendor_id")?,
        }),
        (None, Some(expr)) => Ok(Principal {
            role: Role::Customer,
            id: parse_uuid(expr, "customer_id")?,
        }),
        (Some(_), Some(_)) => Err(SqlError::Parse(
            "filter on vendor_id or customer_id, not both".into(),
        )),
        (None, None) => Err(SqlError::MissingFilter("vendor_id or customer_id")),
    }
}

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

// ── Typed value parsers — errors name the offending column ────

fn parse_uuid(expr: &Expr, column: &'static str) -> Result<Uuid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Uuid::parse_str(s).map_err(|e| SqlError::BadValue {
            column,
            detail: format!("bad UUID: {e}"),
        }),
        _ => Err(SqlError::BadValue {
            column,
            detail: format!("expected UUID string, got {expr:?}"),
        }),
    }
}

fn parse_string(expr: &Expr, column: &'static str) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::BadValue {
            column,
            detail: format!("expected string, got {expr:?}"),
        }),
    }
}

fn parse_i64(expr: &Expr, column: &'static str) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            s.parse().map_err(|e| SqlError::BadValue {
                column,
                detail: format!("bad integer: {e}"),
            })
        }
        _ => {
            if let Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } = expr
            {
                Ok(-parse_i64(expr, column)?)
            } else {
                Err(SqlError::BadValue {
                    column,
                    detail: format!("expected number, got {expr:?}"),
                })
            }
        }
    }
}

fn parse_u32(expr: &Expr, column: &'static str) -> Result<u32, SqlError> {
    let v = parse_i64(expr, column)?;
    u32::try_from(v).map_err(|_| SqlError::BadValue {
        column,
        detail: format!("{v} out of range"),
    })
}

fn parse_usize(expr: &Expr, column: &'static str) -> Result<usize, SqlError> {
    let v = parse_i64(expr, column)?;
    usize::try_from(v).map_err(|_| SqlError::BadValue {
        column,
        detail: format!("{v} out of range"),
    })
}

fn parse_bool(expr: &Expr, column: &'static str) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::BadValue {
                column,
                detail: format!("bad bool: {s}"),
            }),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::BadValue {
            column,
            detail: format!("expected bool, got {expr:?}"),
        }),
    }
}

fn parse_date(expr: &Expr, column: &'static str) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr, column)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SqlError::BadValue {
        column,
        detail: format!("expected ISO date YYYY-MM-DD, got {s:?}"),
    })
}

fn parse_time(expr: &Expr, column: &'static str) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr, column)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|_| SqlError::BadValue {
            column,
            detail: format!("expected HH:MM, got {s:?}"),
        })
}

fn parse_status(expr: &Expr, column: &'static str) -> Result<ItemStatus, SqlError> {
    let s = parse_string(expr, column)?;
    ItemStatus::parse(&s).ok_or(SqlError::BadValue {
        column,
        detail: format!("unknown status {s:?}"),
    })
}

fn parse_method(expr: &Expr, column: &'static str) -> Result<PaymentMethod, SqlError> {
    let s = parse_string(expr, column)?;
    PaymentMethod::parse(&s).ok_or(SqlError::BadValue {
        column,
        detail: format!("unknown payment method {s:?}"),
    })
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Malformed value for a named column — the client-input error path.
    BadValue {
        column: &'static str,
        detail: String,
    },
}

impl SqlError {
    /// True for client-input errors (malformed or missing parameters)
    /// that should map to an invalid-parameter response rather than a
    /// syntax error.
    pub fn is_bad_value(&self) -> bool {
        matches!(
            self,
            SqlError::BadValue { .. } | SqlError::MissingFilter(_)
        )
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadValue { column, detail } => write!(f, "invalid {column}: {detail}"),
        }
    }
}

impl std::error::Error for SqlError {}
