use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use strata_auth::RoleResolver;
use strata_bind::{BindOptions, CollectionBinding, Handle, ListState, QuerySpec};
use strata_cloud::memory::MemoryCloud;
use strata_cloud::AuthProvider;
use strata_core::{collections, CollectionRef, Identity, Query, Role, RoleState, CREATED_AT, CREATED_BY};
use strata_form::FormController;
use strata_ops::Writer;

#[derive(Parser, Debug)]
#[command(name = "stratactl", version, about = "Strata binding-layer exerciser (in-memory backend)")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Seeded account to sign in as (e.g. res-asha, adm-priya, sec-ram)
    #[arg(long = "as", global = true, default_value = "res-asha")]
    uid: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One-shot list of a collection under the signed-in role's query scope
    Ls {
        /// Collection name, e.g. "visitors" or "complaints"
        collection: String,
    },
    /// Live-watch a collection under the signed-in role's query scope
    Watch {
        /// Collection name, e.g. "visitors"
        collection: String,
        /// Keep writing demo rows so the watch has something to show
        #[arg(long = "simulate", action = ArgAction::SetTrue)]
        simulate: bool,
    },
    /// Validate an entity payload against its schema
    Validate {
        /// Entity tag: member, visitor, guard, delivery, alert
        entity: String,
        /// Inline JSON object with the form values
        json: String,
    },
    /// End-to-end walkthrough: role, forms, writes, live and stale views
    Demo,
}

fn init_tracing() {
    let env = std::env::var("STRATA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STRATA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STRATA_METRICS_ADDR; expected host:port");
        }
    }
}

/// Seed the in-memory backend with a small society: profiles plus a few
/// rows per collection, stamped with owners and flats so role scoping has
/// something to bite on.
fn seed(cloud: &MemoryCloud) {
    use serde_json::json;

    cloud.put(collections::USERS, "res-asha", json!({ "role": "resident", "name": "Asha Nair", "flatNumber": "A-101" }));
    cloud.put(collections::USERS, "res-vikram", json!({ "role": "user", "name": "Vikram Rao", "flatNumber": "B-204" }));
    cloud.put(collections::USERS, "adm-priya", json!({ "role": "admin", "name": "Priya Menon" }));
    cloud.put(collections::USERS, "sec-ram", json!({ "role": "security", "name": "Ram Singh" }));

    cloud.put(collections::VISITORS, "v-1", json!({
        "name": "Meter reader", "flatNumber": "A-101", "purpose": "electricity reading",
        "createdBy": "res-asha", "createdAt": "2026-08-03T09:15:00Z", "status": "checked-out"
    }));
    cloud.put(collections::VISITORS, "v-2", json!({
        "name": "Furniture delivery", "flatNumber": "B-204", "purpose": "delivery",
        "createdBy": "res-vikram", "createdAt": "2026-08-03T11:40:00Z", "status": "inside"
    }));
    cloud.put(collections::DELIVERIES, "d-1", json!({
        "company": "BlueDart", "flatNumber": "A-101",
        "createdBy": "res-asha", "createdAt": "2026-08-04T08:05:00Z"
    }));
    cloud.put(collections::COMPLAINTS, "c-1", json!({
        "title": "Lift out of service", "status": "open",
        "createdBy": "res-vikram", "createdAt": "2026-08-02T19:30:00Z"
    }));
    cloud.put(collections::ALERTS, "al-1", json!({
        "title": "Water maintenance", "message": "Supply off 2pm-4pm on Friday.",
        "createdBy": "adm-priya", "createdAt": "2026-08-01T10:00:00Z"
    }));
}

// Role-scoped query policy, kept next to the consumer rather than in the
// shared binder: residents see rows they created, admins see everything,
// security sees the gate collections. An unresolved identity builds no
// query at all.
fn scope_for(state: &RoleState, collection: &str) -> Arc<dyn QuerySpec> {
    let state = state.clone();
    let collection = collection.to_string();
    Arc::new(move |c: &CollectionRef| -> Option<Query> {
        match &state {
            RoleState::Unresolved | RoleState::SignedOut => None,
            RoleState::Resolved { role: Role::Admin, .. } => {
                Some(c.all().order_by_desc(CREATED_AT))
            }
            RoleState::Resolved { role: Role::Security, .. } => {
                match collection.as_str() {
                    collections::VISITORS | collections::DELIVERIES | collections::ALERTS => {
                        Some(c.all().order_by_desc(CREATED_AT))
                    }
                    _ => None,
                }
            }
            RoleState::Resolved { uid, role: Role::Resident } => {
                Some(c.all().where_eq(CREATED_BY, uid.as_str()).order_by_desc(CREATED_AT))
            }
        }
    })
}

fn render_age(rfc3339: Option<&str>) -> String {
    let Some(ts) = rfc3339.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) else {
        return "-".to_string();
    };
    let mut secs = (chrono::Utc::now().timestamp() - ts.timestamp()).max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

fn row_label(r: &strata_core::Record) -> String {
    for field in ["name", "title", "company"] {
        if let Some(s) = r.str_field(field) {
            return s.to_string();
        }
    }
    "-".to_string()
}

fn print_rows(state: &ListState, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            if let Some(err) = &state.error {
                eprintln!("error: {}", err);
                return Ok(());
            }
            println!("{:<34} {:<26} {:<8} AGE", "ID", "LABEL", "FLAT");
            for r in &state.rows {
                println!(
                    "{:<34} {:<26} {:<8} {}",
                    r.id,
                    row_label(r),
                    r.str_field("flatNumber").unwrap_or("-"),
                    render_age(r.str_field(CREATED_AT)),
                );
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&state.rows)?),
    }
    Ok(())
}

async fn wait_settled(binding: &CollectionBinding) {
    let wait_secs =
        std::env::var("STRATA_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(5);
    let mut rx = binding.subscribe_epoch();
    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    while binding.current().loading {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let rem = deadline.duration_since(now).min(Duration::from_secs(1));
        if tokio::time::timeout(rem, rx.changed()).await.is_err() {
            break;
        }
    }
}

async fn wait_rows(handle: &Handle<ListState>, at_least: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut rx = handle.subscribe_epoch();
    while handle.current().rows.len() < at_least && Instant::now() < deadline {
        let _ = tokio::time::timeout(Duration::from_millis(200), rx.changed()).await;
    }
}

/// Sign in as a seeded account and wait for the role to resolve.
async fn establish_session(cloud: &Arc<MemoryCloud>, uid: &str) -> Result<RoleState> {
    cloud.sign_in(Identity::new(uid));
    let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
    let state = resolver.resolved().await;
    match &state {
        RoleState::Resolved { uid, role } => info!(uid = %uid, role = role.as_str(), "session ready"),
        other => warn!(state = ?other, "session did not resolve to a role"),
    }
    Ok(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cloud = Arc::new(MemoryCloud::new());
    seed(&cloud);

    match cli.command {
        Commands::Ls { collection } => {
            let state = establish_session(&cloud, &cli.uid).await?;
            let binding = CollectionBinding::bind(
                cloud.clone(),
                &collection,
                BindOptions { spec: Some(scope_for(&state, &collection)), listen: false },
            );
            wait_settled(&binding).await;
            let snapshot = binding.current();
            if snapshot.rows.is_empty() && snapshot.error.is_none() && state.role() != Some(Role::Admin)
            {
                info!(collection = %collection, "empty result (role scope may exclude this collection)");
            }
            print_rows(&snapshot, cli.output)?;
        }
        Commands::Watch { collection, simulate } => {
            let state = establish_session(&cloud, &cli.uid).await?;
            let binding = CollectionBinding::bind(
                cloud.clone(),
                &collection,
                BindOptions { spec: Some(scope_for(&state, &collection)), listen: true },
            );
            wait_settled(&binding).await;
            print_rows(&binding.current(), cli.output)?;

            if simulate {
                let writer = Writer::new(cloud.clone(), &collection);
                let uid = cli.uid.clone();
                tokio::spawn(async move {
                    let mut n = 0u32;
                    loop {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        n += 1;
                        let payload = serde_json::json!({
                            "name": format!("simulated visitor {}", n),
                            "flatNumber": "A-101",
                            "purpose": "demo traffic",
                            "createdBy": uid,
                        });
                        if let Err(e) = writer.create(payload).await {
                            warn!(error = %e, "simulated write failed");
                            break;
                        }
                    }
                });
            }

            let mut rx = binding.subscribe_epoch();
            info!(collection = %collection, "watching; ctrl-c to exit");
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let s = binding.current();
                        match cli.output {
                            Output::Human => {
                                println!("-- {} rows --", s.rows.len());
                                for r in s.rows.iter().take(5) {
                                    println!("   {} {}", r.id, row_label(r));
                                }
                            }
                            Output::Json => println!("{}", serde_json::to_string(&s.rows)?),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("ctrl-c received; stopping watch");
                        break;
                    }
                }
            }
        }
        Commands::Validate { entity, json } => {
            let schema = strata_form::schemas::by_entity(&entity)
                .ok_or_else(|| anyhow!("unknown entity: {}", entity))?;
            let values: serde_json::Value = serde_json::from_str(&json)?;
            let serde_json::Value::Object(values) = values else {
                return Err(anyhow!("expected a JSON object of form values"));
            };
            let mut form = FormController::new(schema, values);
            let outcome = form.validate();
            match cli.output {
                Output::Human => {
                    if outcome.is_valid {
                        println!("ok: {} payload is valid", entity);
                    } else {
                        let mut fields: Vec<_> = outcome.errors.iter().collect();
                        fields.sort();
                        for (field, message) in fields {
                            println!("{}: {}", field, message);
                        }
                    }
                }
                Output::Json => {
                    let errors: std::collections::BTreeMap<_, _> = outcome.errors.iter().collect();
                    println!(
                        "{}",
                        serde_json::json!({ "valid": outcome.is_valid, "errors": errors })
                    );
                }
            }
        }
        Commands::Demo => {
            run_demo(cloud, &cli.uid).await?;
        }
    }

    Ok(())
}

async fn run_demo(cloud: Arc<MemoryCloud>, uid: &str) -> Result<()> {
    use serde_json::json;

    println!("== session ==");
    let state = establish_session(&cloud, uid).await?;
    println!("signed in as {} -> {:?}", uid, state);

    println!("\n== live binding (visitors, role-scoped) ==");
    let binding = CollectionBinding::bind(
        cloud.clone(),
        collections::VISITORS,
        BindOptions { spec: Some(scope_for(&state, collections::VISITORS)), listen: true },
    );
    let handle = binding.handle();
    wait_settled(&binding).await;
    println!("initial rows: {}", handle.current().rows.len());

    println!("\n== visitor form ==");
    let mut form = FormController::new(
        strata_form::schemas::visitor(),
        json!({ "name": "", "flatNumber": "A-101", "purpose": "guest", "phone": "98765" })
            .as_object()
            .cloned()
            .unwrap_or_default(),
    );
    let first = form.validate();
    println!("first submit valid={} errors={:?}", first.is_valid, first.errors);

    form.set_value("name", "Cousin from Kochi");
    form.set_value("phone", "9876543210");
    let second = form.validate();
    println!("after fixes valid={}", second.is_valid);

    println!("\n== create through the mutation helper ==");
    let writer = Writer::new(cloud.clone(), collections::VISITORS);
    let mut payload = serde_json::Value::Object(form.values().clone());
    if let Some(fields) = payload.as_object_mut() {
        fields.insert(CREATED_BY.to_string(), json!(uid));
    }
    let id = writer.create(payload).await?;
    println!("created visitor {}", id);
    let want = handle.current().rows.len() + 1;
    wait_rows(&handle, want).await;
    println!("live binding now sees {} rows (no manual refresh)", handle.current().rows.len());
    if let Some(row) = handle.current().rows.iter().find(|r| r.id == id) {
        match row.decode::<strata_core::entity::Visitor>() {
            Ok(doc) => println!("typed view: {} visiting {}", doc.data.name, doc.data.flat_number),
            Err(e) => warn!(error = %e, "row did not decode as a visitor"),
        }
    }

    println!("\n== one-shot staleness ==");
    let one_shot = CollectionBinding::bind(
        cloud.clone(),
        collections::VISITORS,
        BindOptions { spec: Some(scope_for(&state, collections::VISITORS)), listen: false },
    );
    wait_settled(&one_shot).await;
    let before = one_shot.current().rows.len();
    let id2 = writer
        .create(json!({
            "name": "Second guest", "flatNumber": "A-101", "purpose": "guest", "createdBy": uid
        }))
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!(
        "created {} but one-shot still sees {} rows (stale by design)",
        id2,
        one_shot.current().rows.len()
    );
    if one_shot.current().rows.len() != before {
        warn!("one-shot view changed without a refetch; staleness contract broken");
    }
    one_shot.refetch().await;
    println!("after refetch: {} rows", one_shot.current().rows.len());

    println!("\n== sign out ==");
    cloud.sign_out();
    let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
    println!("role state: {:?}", resolver.resolved().await);
    Ok(())
}
