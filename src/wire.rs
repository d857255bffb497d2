use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::auth::ForecourtAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct ForecourtHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ForecourtQueryParser>,
}

impl ForecourtHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ForecourtQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch(engine, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => status
        )
        .increment(1);
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::SeedService { service } => {
                engine.seed_service(service).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RetireService { id } => {
                engine.retire_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::UpsertCustomer { id, profile } => {
                engine
                    .upsert_customer(id, profile)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpsertVendor { id, profile } => {
                engine
                    .upsert_vendor(id, profile)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpsertOffering {
                vendor_id,
                offering,
            } => {
                engine
                    .upsert_offering(vendor_id, offering)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateOffering {
                vendor_id,
                service_id,
                price_cents,
                duration_min,
                active,
            } => {
                engine
                    .update_offering(vendor_id, service_id, price_cents, duration_min, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RemoveOffering {
                vendor_id,
                service_id,
            } => {
                engine
                    .remove_offering(vendor_id, service_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::AddCartItem { item } => {
                engine.add_cart_item(item).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RescheduleCartItem {
                id,
                customer_id,
                preferred_date,
                preferred_time,
            } => {
                engine
                    .reschedule_cart_item(id, customer_id, preferred_date, preferred_time)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RemoveCartItem { id, customer_id } => {
                engine
                    .remove_cart_item(id, customer_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::Checkout {
                group_id,
                customer_id,
                method,
            } => {
                let group = engine
                    .checkout(group_id, customer_id, method)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(group.item_ids.len()),
                )])
            }
            Command::DeleteGroup {
                group_id,
                customer_id,
            } => {
                engine
                    .delete_group(group_id, customer_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetItemStatus {
                id,
                principal,
                status,
            } => {
                engine
                    .transition_item(principal, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSlots {
                vendor_id,
                service_id,
                date,
            } => {
                let day = engine
                    .compute_slots(vendor_id, service_id, date)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = day
                    .slots
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.time.format("%H:%M").to_string())?;
                        encoder.encode_field(&slot.is_available)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectServices => {
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_services()
                    .iter()
                    .map(|svc| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&svc.id.to_string())?;
                        encoder.encode_field(&svc.name)?;
                        encoder.encode_field(&svc.category)?;
                        encoder.encode_field(&svc.base_price_cents)?;
                        encoder.encode_field(&(svc.duration_min as i32))?;
                        encoder.encode_field(&svc.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOfferings { vendor_id } => {
                let schema = Arc::new(offerings_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .vendor_offerings(vendor_id)
                    .await
                    .iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.service_id.to_string())?;
                        encoder.encode_field(&o.service_name)?;
                        encoder.encode_field(&o.price_cents)?;
                        encoder.encode_field(&(o.duration_min as i32))?;
                        encoder.encode_field(&o.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectCart { customer_id } => {
                let schema = Arc::new(cart_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .cart(customer_id)
                    .iter()
                    .map(|item| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&item.id.to_string())?;
                        encoder.encode_field(&item.vendor_id.to_string())?;
                        encoder.encode_field(&item.service_id.to_string())?;
                        encoder.encode_field(&item.preferred_date.to_string())?;
                        encoder
                            .encode_field(&item.preferred_time.format("%H:%M").to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectGroups { customer_id } => {
                let schema = Arc::new(groups_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .customer_groups(customer_id)
                    .iter()
                    .map(|g| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&g.id.to_string())?;
                        encoder.encode_field(&g.customer_id.to_string())?;
                        encoder.encode_field(&g.payment.total_cents)?;
                        encoder.encode_field(&g.payment.method.as_str())?;
                        encoder.encode_field(&(g.item_ids.len() as i32))?;
                        encoder.encode_field(&format_ts(&g.created_at))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings {
                owner,
                limit,
                offset,
            } => {
                let items = match owner.role {
                    Role::Vendor => engine.vendor_bookings(owner.id, limit, offset).await,
                    Role::Customer => engine.customer_bookings(owner.id, limit, offset).await,
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = items
                    .iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.group_id.to_string())?;
                        encoder.encode_field(&b.customer_id.to_string())?;
                        encoder.encode_field(&b.vendor_id.to_string())?;
                        encoder.encode_field(&b.service_id.to_string())?;
                        encoder.encode_field(&b.snapshot.name)?;
                        encoder.encode_field(&b.snapshot.price_cents)?;
                        encoder.encode_field(&(b.snapshot.duration_min as i32))?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&format_ts(&b.start_time))?;
                        encoder.encode_field(&format_ts(&b.end_time))?;
                        encoder.encode_field(&b.vendor_done_at.as_ref().map(format_ts))?;
                        encoder.encode_field(&b.confirmed_at.as_ref().map(format_ts))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                parse_vendor_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if let Some(channel) = channel {
                    parse_vendor_channel(&channel)?;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }
}

fn format_ts(ts: &chrono::NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_vendor_channel(channel: &str) -> PgWireResult<Uuid> {
    let id_str = channel.strip_prefix("vendor_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected vendor_{{uuid}})"),
        )))
    })?;
    Uuid::parse_str(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad UUID in channel: {e}"),
        )))
    })
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text_field("time", Type::VARCHAR),
        text_field("is_available", Type::BOOL),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("category", Type::VARCHAR),
        text_field("base_price_cents", Type::INT8),
        text_field("duration_min", Type::INT4),
        text_field("active", Type::BOOL),
    ]
}

fn offerings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("service_id", Type::VARCHAR),
        text_field("service_name", Type::VARCHAR),
        text_field("price_cents", Type::INT8),
        text_field("duration_min", Type::INT4),
        text_field("active", Type::BOOL),
    ]
}

fn cart_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("vendor_id", Type::VARCHAR),
        text_field("service_id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("time", Type::VARCHAR),
    ]
}

fn groups_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("customer_id", Type::VARCHAR),
        text_field("total_cents", Type::INT8),
        text_field("method", Type::VARCHAR),
        text_field("item_count", Type::INT4),
        text_field("created_at", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("group_id", Type::VARCHAR),
        text_field("customer_id", Type::VARCHAR),
        text_field("vendor_id", Type::VARCHAR),
        text_field("service_id", Type::VARCHAR),
        text_field("service_name", Type::VARCHAR),
        text_field("price_cents", Type::INT8),
        text_field("duration_min", Type::INT4),
        text_field("status", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
        text_field("vendor_done_at", Type::VARCHAR),
        text_field("confirmed_at", Type::VARCHAR),
    ]
}

/// Row schema for a statement, judged from its text — enough for
/// Describe on the extended protocol.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("SERVICES") {
        services_schema()
    } else if upper.contains("OFFERINGS") {
        offerings_schema()
    } else if upper.contains("CART_ITEMS") {
        cart_schema()
    } else if upper.contains("BOOKING_GROUPS") {
        groups_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for ForecourtHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ForecourtQueryParser;

#[async_trait]
impl QueryParser for ForecourtQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ForecourtHandler {
    type Statement = String;
    type QueryParser = ForecourtQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Highest $N placeholder in the SQL text.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let digits = rest
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit())
            .count();
        if digits > 0
            && let Ok(n) = rest[..digits].parse::<usize>()
        {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... with bound text-format parameters, quoted and
/// escaped as SQL string literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let literal = match param {
            Some(bytes) => format!(
                "'{}'",
                String::from_utf8_lossy(bytes).replace('\'', "''")
            ),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &literal);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ForecourtFactory {
    handler: Arc<ForecourtHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ForecourtAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ForecourtFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = ForecourtAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ForecourtHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ForecourtFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one accepted TCP connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = ForecourtFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        // The not-found analog of HTTP 404, including disguised
        // ownership mismatches.
        EngineError::NotFound { .. } => "P0002",
        EngineError::AlreadyExists { .. } => "23505",
        EngineError::InvalidTransition { .. } | EngineError::EmptyCart(_) => "P0001",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    // Malformed values are the invalid-parameter analog of HTTP 400;
    // everything else is a plain syntax error.
    let code = if e.is_bad_value() { "22023" } else { "42601" };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
