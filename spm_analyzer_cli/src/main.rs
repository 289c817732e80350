use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use spm_analyzer::{
    analyze_log, events, parse_log, report, timefmt, AnalysisParams, BrakeTestOutcome,
    CrewMember, ParsedLog, RakeType, StationTable, TripAnalysis, TripDetails, Vendor,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Speed-recorder trip analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one recorder export for overspeed, stops and brake tests
    Analyze(AnalyzeArgs),
    /// Inspect recorder exports: detected header, row counts, time span
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Recorder export (PDF, extracted text, CSV or spreadsheet)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Recorder make
    #[arg(long, value_enum)]
    vendor: VendorOpt,

    /// Station/signal reference CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    stations: PathBuf,

    /// Trip details JSON; individual flags override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    trip: Option<PathBuf>,

    /// Analysis parameter overrides JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Track section name
    #[arg(long)]
    section: Option<String>,

    /// Station the analysed run starts from
    #[arg(long)]
    from_station: Option<String>,

    /// Station the analysed run ends at
    #[arg(long)]
    to_station: Option<String>,

    /// Window start (recorder wall-clock, e.g. 2026-01-19T10:00)
    #[arg(long, value_parser = parse_datetime_arg)]
    from: Option<NaiveDateTime>,

    /// Window end
    #[arg(long, value_parser = parse_datetime_arg)]
    to: Option<NaiveDateTime>,

    /// Maximum permissible speed (km/h)
    #[arg(long)]
    mps: Option<f64>,

    /// Rake type (selects brake-test windows)
    #[arg(long, value_enum)]
    rake: Option<RakeOpt>,

    #[arg(long)]
    loco: Option<String>,

    #[arg(long)]
    train: Option<String>,

    /// Loco pilot as `ID:NAME`
    #[arg(long)]
    lp: Option<String>,

    /// Assistant loco pilot as `ID:NAME`
    #[arg(long)]
    alp: Option<String>,

    #[arg(long)]
    analysed_by: Option<String>,

    /// Station match tolerance in metres (defaults per vendor)
    #[arg(long)]
    station_tolerance: Option<f64>,

    /// Skip BFT/BPT evaluation
    #[arg(long, action = ArgAction::SetTrue)]
    no_brake_tests: bool,

    /// Output JSON report path (`-` for stdout)
    #[arg(short, long, default_value = "report.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional stop table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    stops_csv: Option<PathBuf>,

    /// Optional overspeed table CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    overspeed_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// Recorder exports to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Recorder make
    #[arg(long, value_enum)]
    vendor: VendorOpt,

    /// Output report path
    #[arg(short, long, default_value = "spm_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum VendorOpt {
    Vel,
    Mr,
    Telpro,
    TelproNew,
    Laxven,
    Rtis,
    Shm,
}

impl From<VendorOpt> for Vendor {
    fn from(value: VendorOpt) -> Self {
        match value {
            VendorOpt::Vel => Vendor::Vel,
            VendorOpt::Mr => Vendor::Mr,
            VendorOpt::Telpro => Vendor::Telpro,
            VendorOpt::TelproNew => Vendor::TelproNew,
            VendorOpt::Laxven => Vendor::Laxven,
            VendorOpt::Rtis => Vendor::Rtis,
            VendorOpt::Shm => Vendor::Shm,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RakeOpt {
    Goods,
    Coaching,
    Memu,
}

impl From<RakeOpt> for RakeType {
    fn from(value: RakeOpt) -> Self {
        match value {
            RakeOpt::Goods => RakeType::Goods,
            RakeOpt::Coaching => RakeType::Coaching,
            RakeOpt::Memu => RakeType::Memu,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let started = Instant::now();
    let vendor: Vendor = args.vendor.into();
    let trip = build_trip(&args)?;
    let mut params = match args.params.as_ref() {
        Some(path) => load_params(path)?,
        None => AnalysisParams::default(),
    };
    if args.no_brake_tests {
        params.brake_tests = false;
    }
    if let Some(tol) = args.station_tolerance {
        params.station_tolerance_m = Some(tol);
    }
    trip.validate().context("invalid trip details")?;
    params.validate().context("invalid analysis parameters")?;

    let stations = load_station_table(&args.stations)?;
    if stations.section(&trip.section).is_none() {
        warn!(
            "section {} not in station table (known: {})",
            trip.section,
            stations.sections().join(", ")
        );
    }

    let t_read = Instant::now();
    let data =
        fs::read(&args.input).with_context(|| format!("failed to read {}", args.input.display()))?;
    let format = args.input.to_string_lossy().into_owned();
    let log = parse_log(&data, vendor, &format)
        .with_context(|| format!("failed to parse {} as {}", args.input.display(), vendor))?;
    if args.profile {
        info!(
            "[profile] parse: {:.3}s ({} rows)",
            t_read.elapsed().as_secs_f64(),
            log.rows.len()
        );
    }
    info!(
        "{}: {} rows parsed, {} dropped",
        args.input.display(),
        log.rows.len(),
        log.dropped_rows
    );

    let t_analyze = Instant::now();
    let mut analysis = analyze_log(log, &stations, &trip, &params)
        .with_context(|| format!("analysis of {} failed", args.input.display()))?;
    analysis.fingerprint.input_sha256 = Some(report::sha256_hex(&data));
    if args.profile {
        info!("[profile] analyze: {:.3}s", t_analyze.elapsed().as_secs_f64());
    }
    log_analysis(&analysis);

    let t_write = Instant::now();
    write_report_json(&analysis, &args.output)?;
    if let Some(path) = args.stops_csv.as_ref() {
        write_stops_csv(&analysis, path)?;
        info!("Stop table written: {}", path.display());
    }
    if let Some(path) = args.overspeed_csv.as_ref() {
        write_overspeed_csv(&analysis, path)?;
        info!("Overspeed table written: {}", path.display());
    }
    if args.profile {
        info!("[profile] write: {:.3}s", t_write.elapsed().as_secs_f64());
        info!("[profile] total: {:.3}s", started.elapsed().as_secs_f64());
    }
    Ok(())
}

fn build_trip(args: &AnalyzeArgs) -> Result<TripDetails> {
    let base: Option<TripDetails> = match args.trip.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read trip details {}", path.display()))?;
            Some(
                serde_json::from_str(&text)
                    .with_context(|| format!("{} is not a valid trip record", path.display()))?,
            )
        }
        None => None,
    };

    let mut trip = match base {
        Some(trip) => trip,
        None => TripDetails {
            loco_number: String::new(),
            train_number: String::new(),
            rake_type: RakeType::default(),
            max_permissible_speed_kmh: require(args.mps, "--mps")?,
            section: require(args.section.clone(), "--section")?,
            from_station: require(args.from_station.clone(), "--from-station")?,
            to_station: require(args.to_station.clone(), "--to-station")?,
            from_time: require(args.from, "--from")?,
            to_time: require(args.to, "--to")?,
            loco_pilot: None,
            assistant_loco_pilot: None,
            analysed_by: String::new(),
        },
    };

    if let Some(v) = args.mps {
        trip.max_permissible_speed_kmh = v;
    }
    if let Some(v) = args.section.as_ref() {
        trip.section = v.clone();
    }
    if let Some(v) = args.from_station.as_ref() {
        trip.from_station = v.clone();
    }
    if let Some(v) = args.to_station.as_ref() {
        trip.to_station = v.clone();
    }
    if let Some(v) = args.from {
        trip.from_time = v;
    }
    if let Some(v) = args.to {
        trip.to_time = v;
    }
    if let Some(v) = args.rake {
        trip.rake_type = v.into();
    }
    if let Some(v) = args.loco.as_ref() {
        trip.loco_number = v.clone();
    }
    if let Some(v) = args.train.as_ref() {
        trip.train_number = v.clone();
    }
    if let Some(v) = args.lp.as_deref() {
        trip.loco_pilot = Some(parse_crew(v, "LP"));
    }
    if let Some(v) = args.alp.as_deref() {
        trip.assistant_loco_pilot = Some(parse_crew(v, "ALP"));
    }
    if let Some(v) = args.analysed_by.as_ref() {
        trip.analysed_by = v.clone();
    }
    Ok(trip)
}

fn require<T>(value: Option<T>, flag: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("missing {flag} (or supply --trip)"))
}

fn parse_crew(token: &str, designation: &str) -> CrewMember {
    let (id, name) = token.split_once(':').unwrap_or((token, ""));
    CrewMember {
        id: id.trim().to_string(),
        name: name.trim().to_string(),
        designation: designation.to_string(),
        ..CrewMember::default()
    }
}

fn parse_datetime_arg(value: &str) -> std::result::Result<NaiveDateTime, String> {
    timefmt::parse_iso_like(value)
        .or_else(|| timefmt::parse_dmy_flexible(value))
        .ok_or_else(|| format!("unrecognised date/time '{value}'"))
}

fn load_params(path: &Path) -> Result<AnalysisParams> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read parameters {}", path.display()))?;
    let params: AnalysisParams = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid parameter JSON", path.display()))?;
    debug!("loaded parameters from {}", path.display());
    Ok(params)
}

fn load_station_table(path: &Path) -> Result<StationTable> {
    let file = File::open(path)
        .with_context(|| format!("failed to open station table {}", path.display()))?;
    let table = StationTable::from_csv_reader(file)
        .with_context(|| format!("failed to load station table {}", path.display()))?;
    debug!("station table {}: {} sections", path.display(), table.sections().len());
    Ok(table)
}

fn describe_outcome(outcome: &BrakeTestOutcome) -> String {
    match outcome {
        BrakeTestOutcome::Performed(r) => format!(
            "{:.0} -> {:.0} km/h in {:.0}s",
            r.start_speed_kmh, r.end_speed_kmh, r.duration_sec
        ),
        BrakeTestOutcome::Missed => "missed".into(),
        BrakeTestOutcome::NotObserved => "not observed".into(),
    }
}

fn log_analysis(analysis: &TripAnalysis) {
    let s = &analysis.summary;
    info!(
        "run: {:.1} km in {:.0}s, avg {:.1} km/h, max {:.0} km/h",
        s.distance_m / 1000.0,
        s.running_duration_sec,
        s.average_speed_kmh,
        s.max_speed_kmh
    );
    info!("overspeed episodes: {}", s.overspeed_count);
    info!("stops: {}", s.stop_count);
    let unlocated = events::unlocated(&analysis.stops);
    if unlocated > 0 {
        warn!("{unlocated} stops could not be placed on the route");
    }
    if let Some(tests) = analysis.brake_tests.as_ref() {
        info!("BFT: {}", describe_outcome(&tests.bft));
        info!("BPT: {}", describe_outcome(&tests.bpt));
    }
}

fn write_report_json(analysis: &TripAnalysis, path: &Path) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, analysis)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, analysis)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Report written: {}", path.display());
    Ok(())
}

fn write_stops_csv(analysis: &TripAnalysis, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    let mut header = vec![
        "group".to_string(),
        "start_time".into(),
        "end_time".into(),
        "duration_s".into(),
        "location_m".into(),
        "station".into(),
    ];
    header.extend(
        analysis
            .params
            .lookback_distances_m
            .iter()
            .map(|d| format!("speed_at_{d:.0}m")),
    );
    header.push("braking".into());
    writer.write_record(&header)?;

    for stop in &analysis.stops {
        let mut row = vec![
            stop.group.to_string(),
            stop.start_time.to_string(),
            stop.end_time.to_string(),
            format!("{:.0}", stop.duration_sec),
            format!("{:.1}", stop.location_m),
            stop.station_label.clone(),
        ];
        row.extend(stop.speeds_before.iter().map(ToString::to_string));
        row.push(stop.braking_technique.to_string());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_overspeed_csv(analysis: &TripAnalysis, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record([
        "section",
        "start_time",
        "end_time",
        "duration_s",
        "min_speed_kmh",
        "max_speed_kmh",
        "samples",
    ])?;
    for episode in &analysis.overspeeds {
        writer.write_record([
            episode.section.clone(),
            episode.start_time.to_string(),
            episode.end_time.to_string(),
            format!("{:.0}", episode.duration_sec()),
            format!("{:.0}", episode.min_speed_kmh),
            format!("{:.0}", episode.max_speed_kmh),
            episode.sample_count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let vendor: Vendor = args.vendor.into();
    let mut report = String::new();

    for path in &args.inputs {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        report.push_str(&format!("FILE: {}\n", path.display()));
        report.push_str(&format!("  vendor: {}\n", vendor));
        match parse_log(&data, vendor, &path.to_string_lossy()) {
            Ok(log) => describe_log(&mut report, &log),
            Err(err) => {
                warn!("{}: {}", path.display(), err);
                report.push_str(&format!("  error: {}\n", err));
            }
        }
        report.push('\n');
    }

    fs::write(&args.output, report)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Diagnostic report written: {}", args.output.display());
    Ok(())
}

fn describe_log(report: &mut String, log: &ParsedLog) {
    match log.header_row {
        Some(row) => report.push_str(&format!("  header_row: {}\n", row + 1)),
        None => report.push_str("  header_row: n/a\n"),
    }
    if !log.headers.is_empty() {
        report.push_str(&format!("  headers: {}\n", log.headers.join(" | ")));
    }
    report.push_str(&format!("  distance_encoding: {:?}\n", log.encoding));
    report.push_str(&format!("  stop_gate: {:?}\n", log.stop_gate));
    report.push_str(&format!("  rows: {}\n", log.rows.len()));
    report.push_str(&format!("  dropped_rows: {}\n", log.dropped_rows));
    if let (Some(first), Some(last)) = (log.rows.first(), log.rows.last()) {
        report.push_str(&format!("  first_time: {}\n", first.time));
        report.push_str(&format!("  last_time: {}\n", last.time));
    }
    let speeds = log.rows.iter().map(|r| r.speed_kmh);
    let min = speeds.clone().fold(f64::INFINITY, f64::min);
    let max = speeds.fold(f64::NEG_INFINITY, f64::max);
    if min.is_finite() && max.is_finite() {
        report.push_str(&format!("  speed_kmh: {:.1}..{:.1}\n", min, max));
    }
    let stationary = log.rows.iter().filter(|r| r.speed_kmh == 0.0).count();
    report.push_str(&format!("  stationary_rows: {}\n", stationary));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crew_token_splits_id_and_name() {
        let crew = parse_crew("BSP1234: R Kumar", "LP");
        assert_eq!(crew.id, "BSP1234");
        assert_eq!(crew.name, "R Kumar");
        assert_eq!(crew.designation, "LP");
        assert_eq!(parse_crew("X9", "ALP").name, "");
    }

    #[test]
    fn datetime_args() {
        assert!(parse_datetime_arg("2026-01-19T10:00").is_ok());
        assert!(parse_datetime_arg("19/01/2026 10:00:00").is_ok());
        assert!(parse_datetime_arg("noon").is_err());
    }

    #[test]
    fn cli_parses_analyze_flags() {
        let cli = Cli::try_parse_from([
            "spm_analyzer_cli",
            "analyze",
            "trip.csv",
            "--vendor",
            "telpro-new",
            "--stations",
            "stations.csv",
            "--section",
            "BSP-KTE",
            "--from-station",
            "BSP",
            "--to-station",
            "KTE",
            "--from",
            "2026-01-19T10:00",
            "--to",
            "2026-01-19T12:00",
            "--mps",
            "60",
            "--rake",
            "coaching",
        ])
        .unwrap();
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let trip = build_trip(&args).unwrap();
        assert_eq!(trip.rake_type, RakeType::Coaching);
        assert_eq!(trip.max_permissible_speed_kmh, 60.0);
        assert!(matches!(Vendor::from(args.vendor), Vendor::TelproNew));
    }

    #[test]
    fn missing_window_is_reported() {
        let cli = Cli::try_parse_from([
            "spm_analyzer_cli",
            "analyze",
            "trip.csv",
            "--vendor",
            "shm",
            "--stations",
            "stations.csv",
        ])
        .unwrap();
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        let err = build_trip(&args).unwrap_err();
        assert!(err.to_string().contains("--mps"));
    }
}
