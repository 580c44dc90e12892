use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task;
use wxsense::{
    export_csv, parameter_definitions, read_sensor_file, ChartWriter, Config, Dashboard,
    DateSelection, LatLon, RenderRequest, SensorInput, WeatherProvider,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Weather and longwave radiation sensor analysis", long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/wxsense/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Download cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch weather, read a sensor file, align both and write charts
    Render(RenderArgs),
    /// Fetch hourly weather and print a summary
    Weather(WeatherArgs),
    /// Parse a sensor file and print what was read
    Sensor(SensorArgs),
    /// Pressure differences between the configured sites
    Gradient(GradientArgs),
    /// List weather stations near a location
    Stations(StationsArgs),
    /// Explain the charted parameters
    Definitions,
}

#[derive(Args, Debug)]
struct LocationArgs {
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Named place from [places] or a Meteostat station name
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    place: Option<String>,
}

#[derive(Args, Debug)]
struct DateArgs {
    /// A single day (midnight to midnight of the next day)
    #[arg(long, conflicts_with_all = ["start", "end"])]
    date: Option<NaiveDate>,

    #[arg(long)]
    start: Option<NaiveDate>,

    #[arg(long)]
    end: Option<NaiveDate>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[command(flatten)]
    dates: DateArgs,

    /// meteostat or open-meteo
    #[arg(long)]
    provider: Option<WeatherProvider>,

    /// Sensor log to compare against
    #[arg(long)]
    sensor: Option<PathBuf>,

    #[arg(short, long, default_value = "wxsense-out")]
    out: PathBuf,

    /// Also write the tables as CSV
    #[arg(long)]
    export: bool,
}

#[derive(Args, Debug)]
struct WeatherArgs {
    #[command(flatten)]
    location: LocationArgs,

    #[command(flatten)]
    dates: DateArgs,

    #[arg(long)]
    provider: Option<WeatherProvider>,

    /// Write the hourly table to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SensorArgs {
    file: PathBuf,

    /// IANA zone of the logger clock
    #[arg(long)]
    timezone: Option<String>,

    /// Write the sensor charts into this directory
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the readings with their rolling mean to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GradientArgs {
    #[arg(long)]
    start: NaiveDate,

    #[arg(long)]
    end: NaiveDate,

    #[arg(short, long, default_value = "wxsense-gradient")]
    out: PathBuf,

    #[arg(long)]
    export: bool,
}

#[derive(Args, Debug)]
struct StationsArgs {
    #[command(flatten)]
    location: LocationArgs,

    /// Only stations with hourly data covering these days
    #[command(flatten)]
    dates: DateArgs,

    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// Search radius in km
    #[arg(long)]
    radius: Option<f64>,
}

impl DateArgs {
    fn selection(&self, config: &Config) -> DateSelection {
        match self.date {
            Some(day) => DateSelection::SingleDay(day),
            None => DateSelection::Range {
                start: self.start.unwrap_or(config.dates.start),
                end: self.end.unwrap_or(config.dates.end),
            },
        }
    }

    fn given(&self) -> bool {
        self.date.is_some() || self.start.is_some() || self.end.is_some()
    }
}

async fn resolve_location(dashboard: &Dashboard, args: &LocationArgs) -> Result<LatLon> {
    if let Some(place) = &args.place {
        return dashboard
            .resolve_place(place)
            .await
            .with_context(|| format!("Cannot resolve place '{}'", place));
    }
    match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Ok(LatLon::new(lat, lon)?),
        _ => Ok(dashboard.config().location()),
    }
}

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) if !verbose => {
            builder.parse_filters(&filters);
        }
        _ => {
            builder.filter_level(if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            });
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(cache_dir) = cli.cache_dir {
        config.weather.cache_dir = Some(cache_dir);
    }

    match cli.command {
        Command::Definitions => {
            println!("{}", parameter_definitions());
            Ok(())
        }
        Command::Sensor(args) => sensor(config, args).await,
        Command::Render(args) => render(&Dashboard::new(config).await?, args).await,
        Command::Weather(args) => weather(&Dashboard::new(config).await?, args).await,
        Command::Gradient(args) => gradient(&Dashboard::new(config).await?, args).await,
        Command::Stations(args) => stations(&Dashboard::new(config).await?, args).await,
    }
}

async fn render(dashboard: &Dashboard, args: RenderArgs) -> Result<()> {
    let location = resolve_location(dashboard, &args.location).await?;
    let request = RenderRequest::builder()
        .location(location)
        .dates(args.dates.selection(dashboard.config()))
        .provider(args.provider.unwrap_or(dashboard.config().weather.provider))
        .maybe_sensor(args.sensor.map(SensorInput::Path))
        .out_dir(args.out)
        .export(args.export)
        .build();
    let report = dashboard.render(&request).await?;
    print!("{}", report);
    Ok(())
}

async fn weather(dashboard: &Dashboard, args: WeatherArgs) -> Result<()> {
    let config = dashboard.config();
    let location = resolve_location(dashboard, &args.location).await?;
    let range = args.dates.selection(config).query_range()?;
    let weather = dashboard
        .weather_client()
        .hourly()
        .location(location)
        .range(range)
        .provider(args.provider.unwrap_or(config.weather.provider))
        .max_distance_km(config.weather.max_distance_km)
        .station_limit(config.weather.station_limit)
        .call()
        .await?;
    println!("{}", weather.source);
    println!("{}", weather.summary()?);
    if let Some(path) = args.csv {
        let frame = weather.frame;
        task::spawn_blocking(move || export_csv(&frame, &path)).await??;
    }
    Ok(())
}

async fn sensor(mut config: Config, args: SensorArgs) -> Result<()> {
    if args.timezone.is_some() {
        config.sensor.timezone = args.timezone;
    }
    let options = config.sensor;
    let table = read_sensor_file(&args.file, &options)
        .await
        .with_context(|| format!("Failed to read sensor file '{}'", args.file.display()))?;

    println!("{}: {} rows ({} dropped)", table.value_label(), table.len(), table.dropped_rows());
    if let Some((first, last)) = table.span() {
        println!("period: {} .. {}", first, last);
    }
    let dates: Vec<String> = table.unique_dates().iter().map(|d| d.to_string()).collect();
    println!("days:   {}", dates.join(", "));

    let written = task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if let Some(out) = args.out {
            let writer = ChartWriter::new(&out)?;
            written.extend(writer.sensor_charts(&table, options.rolling_window, options.downsample_step)?);
        }
        if let Some(path) = args.csv {
            export_csv(&table.with_rolling_mean(options.rolling_window)?, &path)?;
            written.push(path);
        }
        Ok(written)
    })
    .await??;
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

async fn gradient(dashboard: &Dashboard, args: GradientArgs) -> Result<()> {
    let report = dashboard
        .gradient()
        .start(args.start)
        .end(args.end)
        .out_dir(args.out)
        .export(args.export)
        .call()
        .await?;
    let settings = &dashboard.config().gradient;
    println!(
        "{} hours, {} at or above {} hPa ({})",
        report.gradient.frame.height(),
        report.hours_above_threshold,
        settings.threshold_hpa,
        settings.threshold_label
    );
    for path in report.charts.iter().chain(&report.exports) {
        println!("wrote {}", path.display());
    }
    Ok(())
}

async fn stations(dashboard: &Dashboard, args: StationsArgs) -> Result<()> {
    let location = resolve_location(dashboard, &args.location).await?;
    let range = if args.dates.given() {
        Some(args.dates.selection(dashboard.config()).query_range()?)
    } else {
        None
    };
    let stations = dashboard
        .weather_client()
        .find_stations()
        .location(location)
        .maybe_range(range)
        .max_distance_km(args.radius.unwrap_or(dashboard.config().weather.max_distance_km))
        .station_limit(args.limit)
        .call()
        .await?;
    info!("{} station(s) near {}", stations.len(), location);
    for (station, distance_km) in stations {
        let hourly = &station.inventory.hourly;
        let bound = |d: Option<NaiveDate>| d.map_or_else(|| "?".to_string(), |d| d.to_string());
        println!(
            "{:>6}  {:<32} {:>6.1} km  hourly {} .. {}",
            station.id,
            station.display_name(),
            distance_km,
            bound(hourly.start),
            bound(hourly.end)
        );
    }
    Ok(())
}
