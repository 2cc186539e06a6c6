// ── Signet daemon entry point ──────────────────────────────────────────────
// Wires config -> logging -> database -> components -> background tasks ->
// the main relay event loop -> the local HTTP+SSE management API, then
// waits for Ctrl-C to shut down.

use signet::acl::AclEngine;
use signet::atoms::constants::SHUTDOWN_GRACE_SECS;
use signet::audit::AuditLog;
use signet::codec::bech32;
use signet::codec::event::hex_encode;
use signet::config::Config;
use signet::connection::ConnectionService;
use signet::db::Db;
use signet::deadman::DeadManSwitch;
use signet::events::{EventBus, SignetEvent};
use signet::http::{self, AppState};
use signet::keystore::KeyStore;
use signet::killswitch::KillSwitch;
use signet::pipeline::RequestPipeline;
use signet::queue::AuthorizationQueue;
use signet::relay::RelayPool;
use signet::subscriptions::SubscriptionManager;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

fn admin_pubkey_hex(config: &Config) -> Option<String> {
    let npub = config.admin_npub.as_deref()?;
    let bytes = bech32::decode_npub(npub).ok()?;
    Some(hex_encode(&bytes))
}

#[tokio::main]
async fn main() {
    let config_path = std::env::var("SIGNET_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("signet.toml"));
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    let bus = Arc::new(EventBus::new());
    let audit = AuditLog::new(bus.clone());
    signet::audit::init(audit.clone());

    let db = match Db::open(&config.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("failed to open database at {}: {e}", config.db_path.display());
            std::process::exit(1);
        }
    };

    let keystore = Arc::new(KeyStore::new(db.clone()));
    match keystore.activate_persisted_plaintext_keys() {
        Ok(n) if n > 0 => log::info!("activated {n} unencrypted key(s) from disk"),
        Ok(_) => {}
        Err(e) => log::warn!("failed to activate persisted keys: {e}"),
    }
    for bootstrap in &config.bootstrap_keys {
        log::warn!("loading unencrypted bootstrap key '{}' from config", bootstrap.name);
        match bech32::decode_nsec(&bootstrap.nsec) {
            Ok(secret) => {
                if let Err(e) = keystore.create_key(&bootstrap.name, secret, None) {
                    log::warn!("failed to load bootstrap key '{}': {e}", bootstrap.name);
                }
            }
            Err(e) => log::warn!("invalid nsec for bootstrap key '{}': {e}", bootstrap.name),
        }
    }

    let acl = Arc::new(AclEngine::new(db.clone()));
    let connections = Arc::new(ConnectionService::new(db.clone()));
    let relay = RelayPool::new(config.relays.clone(), bus.clone());
    let subscriptions = Arc::new(SubscriptionManager::new(relay.clone(), bus.clone()));
    let active_pubkeys: Vec<String> = keystore.active_keys().iter().map(|k| k.pubkey_hex.clone()).collect();
    subscriptions.rebuild_all(&active_pubkeys);

    let pipeline = Arc::new(RequestPipeline::new(db.clone(), keystore.clone(), acl.clone(), relay.clone(), bus.clone(), connections.clone()));
    let queue = Arc::new(AuthorizationQueue::new(db.clone(), acl.clone(), bus.clone()));
    queue.clone().spawn_sweeper();

    let admin_pubkey = admin_pubkey_hex(&config);
    let killswitch = KillSwitch::new(db.clone(), keystore.clone(), bus.clone(), admin_pubkey.clone(), config.admin_relays.clone());
    let deadman = DeadManSwitch::new(db.clone(), keystore.clone(), bus.clone(), admin_pubkey, killswitch.admin_pool());
    killswitch.set_deadman(deadman.clone());
    killswitch.clone().spawn();
    deadman.clone().spawn_sweeper();

    {
        let relay = relay.clone();
        let subscriptions = subscriptions.clone();
        let keystore = keystore.clone();
        let mut pool_events = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = pool_events.recv().await {
                if matches!(event, SignetEvent::PoolReset) {
                    log::info!("pool reset: reconnecting relays and rebuilding subscriptions");
                    relay.reset();
                    let active_pubkeys: Vec<String> = keystore.active_keys().iter().map(|k| k.pubkey_hex.clone()).collect();
                    subscriptions.rebuild_all(&active_pubkeys);
                }
            }
        });
    }

    let session_token = Uuid::new_v4().to_string();
    let csrf_token = Uuid::new_v4().to_string();
    log::info!("management API session token: {session_token}");
    log::info!("management API csrf token: {csrf_token}");

    let state = Arc::new(AppState {
        db: db.clone(),
        keystore: keystore.clone(),
        acl,
        relay: relay.clone(),
        subscriptions,
        connections,
        pipeline: pipeline.clone(),
        queue,
        killswitch,
        deadman,
        bus,
        audit,
        session_token,
        csrf_token,
    });

    let mut incoming = relay.incoming();
    tokio::spawn(async move {
        while let Ok(event) = incoming.recv().await {
            pipeline.handle_event(&event.event).await;
        }
    });

    let http_bind = config.http_bind;
    tokio::select! {
        result = http::serve(state, http_bind) => {
            if let Err(e) = result {
                log::error!("management API server exited: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown requested, draining for {SHUTDOWN_GRACE_SECS}s");
            tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
        }
    }
}
