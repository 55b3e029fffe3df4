use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use shorewatch_core::LocationSource;
use shorewatch_server::{
    config,
    monitor::Monitor,
    sources::{ChannelSource, ReplaySource},
    web::Web,
    Cli, ServerError, Session, SourceKind, VERSION,
};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    info!("shorewatch-server {}", VERSION);

    let config = config::load_config(&args).into_diagnostic()?;
    let boundaries = config::load_boundaries_for(&args).into_diagnostic()?;

    // Pick the source up front so a bad replay file fails before anything starts
    let (source, position_input) = match args.source {
        SourceKind::Http => {
            let (source, handle) = ChannelSource::new();
            (Box::new(source) as Box<dyn LocationSource>, Some(handle))
        }
        SourceKind::Replay => {
            let path = args
                .replay_file
                .as_ref()
                .ok_or(ServerError::MissingReplayFile)
                .into_diagnostic()?;
            let source = ReplaySource::from_file(path, args.replay_speed, args.replay_loop)
                .into_diagnostic()?;
            (Box::new(source) as Box<dyn LocationSource>, None)
        }
    };

    let session = Session::new(args, config, boundaries.into_shared());

    Toplevel::new(|s: SubsystemHandle| async move {
        let (monitor, _monitor_handle) = Monitor::new(session.clone(), source);
        let web = Web::new(session, position_input);

        s.start(SubsystemBuilder::new("Monitor", |subsys| monitor.run(subsys)));
        s.start(SubsystemBuilder::new("Webserver", |subsys| web.run(subsys)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .into_diagnostic()
}
