use crate::config::LoggingConfig;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::Once;

static INIT: Once = Once::new();
static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

pub fn setup_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_file = config
        .log_file
        .clone()
        .unwrap_or_else(|| "logs/connwatch.log".to_string());
    let level = config
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);

    INIT.call_once(|| {
        let result = (|| {
            if let Some(dir) = Path::new(&log_file).parent() {
                fs::create_dir_all(dir)
                    .map_err(|e| format!("Failed to create log directory: {}", e))?;
            }

            let logfile = FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(
                    "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}\n",
                )))
                .append(true)
                .build(&log_file)
                .map_err(|e| format!("Failed to create log file: {}", e))?;

            let config = Config::builder()
                .appender(Appender::builder().build("file", Box::new(logfile)))
                .build(Root::builder().appender("file").build(level))
                .map_err(|e| format!("Failed to build log config: {}", e))?;

            log4rs::init_config(config).map_err(|e| format!("Logging initialization failed: {}", e))?;

            Ok(())
        })();

        *INIT_RESULT.lock().unwrap() = Some(result);
    });

    let guard = INIT_RESULT.lock().unwrap();
    match guard.as_ref() {
        Some(Ok(())) => Ok(()),
        Some(Err(msg)) => Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            msg.clone(),
        ))),
        None => Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Logging not initialized",
        ))),
    }
}
