use chrono::{DateTime, Local};

fn build_time(format: &str) -> String {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    let build_datetime: DateTime<Local> = DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now);
    build_datetime.format(format).to_string()
}

pub fn get_version_info() -> &'static str {
    Box::leak(
        format!(
            "{}\n\
         Build Time: {}\n\
         Git Commit: {}",
            env!("CARGO_PKG_VERSION"),
            build_time("%Y-%m-%d %H:%M:%S %Z"),
            env!("GIT_COMMIT_HASH"),
        )
        .into_boxed_str(),
    )
}

pub fn get_short_version() -> &'static str {
    Box::leak(
        format!(
            "{}-{}",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT_HASH")
        )
        .into_boxed_str(),
    )
}

/// User-Agent for outgoing HTTP requests
pub fn get_useragent() -> String {
    format!(
        "clicktocall/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_time("%Y-%m-%d")
    )
}
