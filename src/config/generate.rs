pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# FIREWATCH CONFIGURATION
# =============================================================================
# Firewatch reads firewall/network events from a document store, serves
# aggregations over them, and pushes newly arrived events to live observers.
#
# Values of the form $env{VAR} are replaced with environment variables before
# parsing. An unset variable is a configuration error.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/firewatch/config.yml
#   3. /etc/firewatch/config.yml

# =============================================================================
# DOCUMENT STORE
# =============================================================================

store:
  # 'elasticsearch' for a live cluster, 'memory' for local experiments
  type: elasticsearch
  url: http://localhost:9200
  # Index or index pattern queried for events
  index: "firewall-*"
  # Field holding each event's time
  time_field: "@timestamp"
  # Upper bound on any single store call
  timeout: 10s
  # Optional basic auth
  # username: elastic
  # password: $env{ES_PASSWORD}
  # Memory backend only: newline-delimited JSON documents to preload
  # seed_path: ~/firewatch-sample.ndjson

# =============================================================================
# LIVE FEED
# =============================================================================
# The store is polled only while at least one observer is connected.

feed:
  # Initial polling cadence, shared by all observers
  interval: 5s
  # Maximum documents delivered per poll (at most 200)
  page_size: 100
  # Recent documents sent once to each new observer (0-200)
  backfill_size: 200
  # Batches buffered per observer before a slow observer starts skipping
  channel_capacity: 64
  # On a failed poll: 'advance' skips the failed window, 'hold' retries it
  on_store_error: advance
  # Bounds for observer-requested interval changes
  min_interval: 1s
  max_interval: 1h

# =============================================================================
# FIELD RESOLUTION
# =============================================================================
# Each canonical field (sourceIP, bytes, action, ...) is looked up under a list
# of concrete field names. The first name present in the index wins.

fields:
  # How long a resolution is trusted before the index is probed again
  cache_ttl: 10m
  # Replace the built-in variant list for a canonical field, or add new ones
  # overrides:
  #   sourceIP: ["source.ip", "srcip"]
  #   vdom: ["fortinet.firewall.vd", "vd"]

# =============================================================================
# WEB SERVER SETTINGS
# =============================================================================

web:
  listen: 127.0.0.1:7104
  # Set to 0.0.0.0:7104 to allow external connections
"#
    .to_string()
}
