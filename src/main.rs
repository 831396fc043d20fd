use clap::Parser;
use delivery_zones::config::EngineConfig;
use delivery_zones::delivery::{
    DeliveryEngine, FallbackReason, FileStore, IpGeolocationProvider, OrchestratorState,
    ResolutionResult, ResolutionSource, ResolveError,
};
use delivery_zones::geo::GeoCoordinate;
use delivery_zones::server;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Delivery zone lookup for the Jaipur store.
///
/// Resolves where you are (or the pincode you give) into a delivery tier
/// with its ETA. Without arguments it tries to detect your location and
/// asks for a pincode if that fails. The answer is saved and reused until
/// you pass --clear or --auto.
///
/// Examples:
///   zones 302004
///   zones --pincode 110001
///   zones --lat 26.85 --lon 75.80
///   zones --auto
///   zones --offline
///   zones --zones
///   zones --serve --port 8080
#[derive(Parser)]
#[command(name = "zones", version, about, long_about = None)]
struct Cli {
    /// Pincode (positional). Example: zones 302004
    #[arg(index = 1)]
    pincode_positional: Option<String>,

    /// Pincode (named). Example: --pincode 302004
    #[arg(long, short = 'p')]
    pincode: Option<String>,

    /// Latitude (-90 to 90).
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    /// Longitude (-180 to 180).
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Detect location again, ignoring the saved one.
    #[arg(long, short = 'a')]
    auto: bool,

    /// Forget the saved delivery location.
    #[arg(long)]
    clear: bool,

    /// Skip IP geolocation and go straight to pincode entry.
    #[arg(long)]
    offline: bool,

    /// Config file. Defaults to ~/.varaha/config.json if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the zone table and exit.
    #[arg(long)]
    zones: bool,

    /// Run the HTTP API instead of resolving once.
    #[arg(long)]
    serve: bool,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 3000)]
    port: u16,
}

fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn fail(msg: impl Display) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    setup_tracing();
    let cli = Cli::parse();

    let config = EngineConfig::load_or_default(cli.config.as_deref()).unwrap_or_else(|e| fail(e));

    // ── One-shot modes ──────────────────────────────────────────

    if cli.zones {
        print_zone_table(&config);
        return;
    }

    if cli.serve {
        let resolver = config.resolver().unwrap_or_else(|e| fail(e));
        if let Err(e) = server::start(&cli.host, cli.port, resolver).await {
            fail(format!("server on {}:{} stopped: {}", cli.host, cli.port, e));
        }
        return;
    }

    // ── Resolve ─────────────────────────────────────────────────

    let store = Arc::new(FileStore::open(config.store_path()));
    debug!(path = %store.path().display(), "using store");
    let mut engine = config.engine(store).unwrap_or_else(|e| fail(e));

    if cli.clear {
        engine.cache().clear();
        eprintln!("  Saved delivery location cleared.");
        let nothing_else = cli.pincode.is_none()
            && cli.pincode_positional.is_none()
            && cli.lat.is_none()
            && !cli.auto;
        if nothing_else {
            return;
        }
    }

    let result = if let Some(code) = cli.pincode.as_deref().or(cli.pincode_positional.as_deref()) {
        let result = engine.resolver().resolve_by_postal_code(code).unwrap_or_else(|e| fail(e));
        engine.cache().store(&result);
        Arc::new(result)
    } else if let (Some(lat), Some(lon)) = (cli.lat, cli.lon) {
        let result = engine
            .resolver()
            .resolve_by_position(GeoCoordinate::new(lat, lon), ResolutionSource::Coordinates)
            .unwrap_or_else(|e| fail(e));
        engine.cache().store(&result);
        Arc::new(result)
    } else {
        if cli.auto {
            engine.cache().clear();
        }
        if !cli.offline {
            engine = engine.with_provider(Arc::new(IpGeolocationProvider::new()));
        }
        resolve_interactively(&engine).await
    };

    // ── Print banner ────────────────────────────────────────────

    let local = result.resolved_at.with_timezone(&chrono_tz::Asia::Kolkata);
    eprintln!("  {}", result.display_line());
    eprintln!("  {}", result.message);
    eprintln!("  Resolved {} via {}", local.format("%Y-%m-%d %H:%M %Z"), result.source);

    // JSON to stdout
    match serde_json::to_string_pretty(&*result) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

/// Drive one orchestrator to a result, prompting on stdin whenever it
/// hands over to manual entry.
async fn resolve_interactively(engine: &DeliveryEngine) -> Arc<ResolutionResult> {
    let orchestrator = engine.orchestrator();
    let mut updates = orchestrator.subscribe();
    if orchestrator.start() == OrchestratorState::AttemptingGeolocation {
        eprintln!("  Detecting your location...");
    }

    let mut noticed = false;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if let Some(result) = snapshot.result {
            return result;
        }

        if snapshot.state != OrchestratorState::AwaitingManualInput {
            if updates.changed().await.is_err() {
                fail("delivery resolution stopped unexpectedly");
            }
            continue;
        }

        if let (Some(reason), false) = (snapshot.fallback, noticed) {
            eprintln!("  {}", fallback_notice(reason));
            noticed = true;
        }
        let line = read_pincode().await;
        match orchestrator.submit_postal_code(&line).await {
            Ok(result) => return result,
            Err(e @ ResolveError::InvalidPostalCodeFormat { .. }) => eprintln!("  {}", e),
            Err(ResolveError::Superseded) => continue,
            Err(e) => fail(e),
        }
    }
}

fn fallback_notice(reason: FallbackReason) -> &'static str {
    match reason {
        FallbackReason::PermissionDenied => "Location access was denied.",
        FallbackReason::PositionUnavailable => "Could not determine your location.",
        FallbackReason::Timeout | FallbackReason::FallbackTimer => "Location is taking too long.",
        FallbackReason::Unsupported => "Automatic location is unavailable.",
    }
}

/// Write a prompt without a newline and push it out before reading input.
fn prompt(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    write!(out, "  {}", text)?;
    out.flush()
}

async fn read_pincode() -> String {
    if let Err(e) = prompt(&mut std::io::stderr(), "Enter your 6-digit pincode: ") {
        fail(e);
    }

    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|n| (n, line))
    })
    .await;

    match read {
        Ok(Ok((0, _))) => fail("no pincode entered"),
        Ok(Ok((_, line))) => line,
        Ok(Err(e)) => fail(e),
        Err(e) => fail(e),
    }
}

fn print_zone_table(config: &EngineConfig) {
    for (from, to, zone) in config.zones.ranges() {
        let range = if to.is_finite() {
            format!("{:.0}-{:.0} km", from, to)
        } else {
            format!("{:.0}+ km", from)
        };
        eprintln!(
            "  {} {:<18} {:<12} {}",
            zone.icon_glyph, zone.display_label, range, zone.eta_label
        );
    }
    match serde_json::to_string_pretty(&config.zones) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_prompt_writes_text() {
        let mut out = Vec::new();
        prompt(&mut out, "Enter your 6-digit pincode: ").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "  Enter your 6-digit pincode: ");
    }

    #[test]
    fn test_prompt_reports_flush_failure() {
        let err = prompt(&mut BrokenPipe, "Enter your 6-digit pincode: ").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
