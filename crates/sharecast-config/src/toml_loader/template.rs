//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Sharecast Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[signaling]
# bind = "0.0.0.0"
# port = 4000
# channel_capacity = 256   # 1-65536, outbound frames queued per connection

[http]
# enabled = true
# port = 4001
# cors_origin = "http://localhost:8080"   # empty = any origin

[media]
# listen_ip = "0.0.0.0"
# announced_ip = "203.0.113.10"
# rtc_min_port = 10000
# rtc_max_port = 10100
# enable_udp = true
# enable_tcp = true
# prefer_udp = true

# [[media.codecs]]
# kind = "audio"
# mime_type = "audio/opus"
# clock_rate = 48000
# channels = 2

# [[media.codecs]]
# kind = "video"
# mime_type = "video/VP8"
# clock_rate = 90000

[engine]
# death_grace_ms = 2000    # 0-60000, wait before exiting after the engine dies

[logging]
# filter = "sharecast_server=info"
"##
    .to_string()
}
