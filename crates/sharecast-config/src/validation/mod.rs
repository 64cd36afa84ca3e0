//! Full configuration validation.
//!
//! Each section has its own check; this orchestrator runs them all and
//! collects every problem into a single `ConfigError`.

mod helpers;


use crate::schema::ShareConfig;
use helpers::validate_range;
use sharecast_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ShareConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_endpoints(&mut errors, config);
    validate_media(&mut errors, config);
    validate_range(
        &mut errors,
        "engine.death_grace_ms",
        config.engine.death_grace_ms,
        0,
        60_000,
    );
    if config.logging.filter.trim().is_empty() {
        errors.push("logging.filter must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_endpoints(errors: &mut Vec<String>, config: &ShareConfig) {
    validate_range(
        errors,
        "signaling.channel_capacity",
        u64::from(config.signaling.channel_capacity),
        1,
        65_536,
    );
    if config.signaling.port == 0 {
        errors.push("signaling.port must not be 0".into());
    }
    if config.http.enabled {
        if config.http.port == 0 {
            errors.push("http.port must not be 0".into());
        }
        if config.http.port == config.signaling.port {
            errors.push(format!(
                "http.port and signaling.port are both {}",
                config.http.port
            ));
        }
    }
}

fn validate_media(errors: &mut Vec<String>, config: &ShareConfig) {
    let media = &config.media;
    if media.rtc_min_port < 1024 {
        errors.push(format!(
            "media.rtc_min_port = {} is a privileged port",
            media.rtc_min_port
        ));
    }
    if media.rtc_min_port > media.rtc_max_port {
        errors.push(format!(
            "media.rtc_min_port ({}) > media.rtc_max_port ({})",
            media.rtc_min_port, media.rtc_max_port
        ));
    }
    if !media.enable_udp && !media.enable_tcp {
        errors.push("media: at least one of enable_udp / enable_tcp must be set".into());
    }
    if media.codecs.is_empty() {
        errors.push("media.codecs must list at least one codec".into());
    }
    for (i, codec) in media.codecs.iter().enumerate() {
        if codec.kind != "audio" && codec.kind != "video" {
            errors.push(format!(
                "media.codecs[{i}].kind = {:?} must be \"audio\" or \"video\"",
                codec.kind
            ));
        } else if !codec.mime_type.starts_with(&format!("{}/", codec.kind)) {
            errors.push(format!(
                "media.codecs[{i}].mime_type = {:?} does not match kind {:?}",
                codec.mime_type, codec.kind
            ));
        }
        if codec.clock_rate == 0 {
            errors.push(format!("media.codecs[{i}].clock_rate must not be 0"));
        }
    }
}
