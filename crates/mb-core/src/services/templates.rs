use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Value, json};

use crate::error::Result;
use crate::models::PortSet;

/// Tenant id the realtime server derives from its own container name. The
/// part before the first `.` of the container name is the tenant.
pub const REALTIME_TENANT: &str = "realtime-dev";

/// Compose service names of the managed stack, in start-up dependency order.
pub const STACK_SERVICES: &[&str] = &[
    "vector",
    "db",
    "analytics",
    "auth",
    "rest",
    "realtime",
    "imgproxy",
    "storage",
    "meta",
    "functions",
    "pooler",
    "kong",
    "studio",
];

/// Services whose logs the log router forwards to analytics, with the
/// analytics source each one lands in.
const LOG_SOURCES: &[(&str, &str)] = &[
    ("kong", "cloudflare.logs.prod"),
    ("auth", "gotrue.logs.prod"),
    ("rest", "postgREST.logs.prod"),
    ("realtime", "realtime.logs.prod"),
    ("storage", "storage.logs.prod.2"),
    ("functions", "deno-relay-logs"),
    ("db", "postgres.logs"),
    ("pooler", "supavisor.logs.prod"),
];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(NAME|CONTAINER|PORT)(?::([a-z_]+))?%").unwrap());

/// Container name for one service of an instance.
///
/// Every container is `<instance>-<service>` except realtime, which must be
/// `realtime-dev.<instance>-realtime`: the realtime server reads its tenant
/// from the container name, and any other shape fails at runtime with
/// "tenant not found" rather than at config validation.
pub fn container_name(instance: &str, service: &str) -> String {
    match service {
        "realtime" => format!("{REALTIME_TENANT}.{instance}-realtime"),
        "functions" => format!("{instance}-edge-functions"),
        other => format!("{instance}-{other}"),
    }
}

fn port_by_key(ports: &PortSet, key: &str) -> Option<u16> {
    match key {
        "gateway_http" => Some(ports.gateway_http),
        "gateway_https" => Some(ports.gateway_https),
        "admin_ui" => Some(ports.admin_ui),
        "database" => Some(ports.database),
        "pool_proxy" => Some(ports.pool_proxy),
        "telemetry" => Some(ports.telemetry),
        _ => None,
    }
}

fn fill(template: &str, name: &str, ports: &PortSet) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let arg = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            match &caps[1] {
                "NAME" => name.to_string(),
                "CONTAINER" => container_name(name, arg),
                _ => port_by_key(ports, arg)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

pub fn render_compose(name: &str, ports: &PortSet) -> String {
    fill(COMPOSE_TEMPLATE, name, ports)
}

/// Origins the gateway accepts cross-origin calls from: the instance's own
/// admin UI and gateway plus any configured extras.
pub fn cors_origins(ports: &PortSet, extra: &[String]) -> Vec<String> {
    let mut origins = vec![
        format!("http://localhost:{}", ports.admin_ui),
        format!("http://localhost:{}", ports.gateway_http),
    ];
    for origin in extra {
        if !origins.contains(origin) {
            origins.push(origin.clone());
        }
    }
    origins
}

struct Route {
    name: &'static str,
    url: &'static str,
    path: &'static str,
    strip_path: bool,
    admin_only: bool,
    rate_limited: bool,
}

/// Requests per minute the gateway lets one client make to the auth routes.
pub const AUTH_RATE_LIMIT_PER_MINUTE: u32 = 100;

pub const RATE_LIMIT_PLUGIN: &str = "rate-limiting";

const ROUTES: &[Route] = &[
    Route { name: "auth-v1", url: "http://auth:9999/verify", path: "/auth/v1/verify", strip_path: true, admin_only: false, rate_limited: true },
    Route { name: "auth-v1-admin", url: "http://auth:9999/admin", path: "/auth/v1/admin", strip_path: true, admin_only: true, rate_limited: true },
    Route { name: "rest", url: "http://rest:3000", path: "/rest/v1", strip_path: true, admin_only: false, rate_limited: false },
    Route { name: "realtime", url: "http://realtime:4000/socket/", path: "/realtime/v1", strip_path: true, admin_only: false, rate_limited: false },
    Route { name: "storage", url: "http://storage:5000", path: "/storage/v1", strip_path: true, admin_only: false, rate_limited: false },
    Route { name: "meta", url: "http://meta:8080", path: "/pg", strip_path: true, admin_only: true, rate_limited: false },
    Route { name: "functions", url: "http://functions:9000", path: "/functions/v1", strip_path: true, admin_only: false, rate_limited: false },
];

/// Declarative gateway config. Key placeholders are expanded by the gateway
/// container's entrypoint from its environment.
pub fn render_kong(origins: &[String]) -> Result<String> {
    let cors = json!({ "name": "cors", "config": { "origins": origins, "credentials": true } });
    let services: Vec<Value> = ROUTES
        .iter()
        .map(|route| {
            let mut plugins = vec![cors.clone()];
            if route.rate_limited {
                plugins.push(rate_limit_plugin());
            }
            if route.admin_only {
                plugins.push(json!({ "name": "key-auth", "config": { "hide_credentials": true } }));
                plugins.push(json!({
                    "name": "acl",
                    "config": { "hide_groups_header": true, "allow": ["admin"] }
                }));
            }
            json!({
                "name": route.name,
                "url": route.url,
                "routes": [{
                    "name": format!("{}-route", route.name),
                    "paths": [route.path],
                    "strip_path": route.strip_path,
                }],
                "plugins": plugins,
            })
        })
        .collect();
    let doc = json!({
        "_format_version": "2.1",
        "_transform": true,
        "consumers": [
            { "username": "anonymous", "keyauth_credentials": [{ "key": "$SUPABASE_ANON_KEY" }] },
            {
                "username": "service_role",
                "keyauth_credentials": [{ "key": "$SUPABASE_SERVICE_KEY" }],
                "acls": [{ "group": "admin" }]
            },
            {
                "username": "dashboard",
                "basicauth_credentials": [{ "username": "$DASHBOARD_USERNAME", "password": "$DASHBOARD_PASSWORD" }],
                "acls": [{ "group": "admin" }]
            }
        ],
        "services": services,
    });
    Ok(serde_yaml::to_string(&doc)?)
}

/// Per-client limit counted in each gateway node's memory.
pub fn rate_limit_plugin() -> Value {
    json!({
        "name": RATE_LIMIT_PLUGIN,
        "config": { "minute": AUTH_RATE_LIMIT_PER_MINUTE, "policy": "local" }
    })
}

/// Log router config. Routes match on the same container names the compose
/// file assigns, so both must come from [`container_name`].
pub fn render_vector(name: &str) -> Result<String> {
    let mut routes = serde_json::Map::new();
    let mut sinks = serde_json::Map::new();
    sinks.insert(
        "console".into(),
        json!({ "type": "console", "inputs": ["project_logs"], "encoding": { "codec": "json" } }),
    );
    for (service, source) in LOG_SOURCES {
        let container = container_name(name, service);
        routes.insert(
            (*service).into(),
            Value::String(format!(".appname == \"{container}\"")),
        );
        sinks.insert(
            format!("logflare_{service}"),
            json!({
                "type": "http",
                "inputs": [format!("router.{service}")],
                "encoding": { "codec": "json" },
                "method": "post",
                "request": { "retry_max_duration_secs": 10 },
                "uri": format!("http://analytics:4000/api/logs?source_name={source}&api_key=${{LOGFLARE_API_KEY}}"),
            }),
        );
    }
    let doc = json!({
        "api": { "enabled": true, "address": "0.0.0.0:9001" },
        "sources": {
            "docker_host": {
                "type": "docker_logs",
                "include_containers": [
                    format!("{name}-"),
                    format!("{REALTIME_TENANT}.{name}-"),
                ],
                "exclude_containers": [container_name(name, "vector")],
            }
        },
        "transforms": {
            "project_logs": {
                "type": "remap",
                "inputs": ["docker_host"],
                "source": format!(
                    ".project = \"{name}\"\n.event_message = del(.message)\n.appname = del(.container_name)\ndel(.container_created_at)\ndel(.container_id)\ndel(.source_type)\ndel(.stream)\ndel(.label)\ndel(.image)\ndel(.host)\n"
                ),
            },
            "router": {
                "type": "route",
                "inputs": ["project_logs"],
                "route": routes,
            }
        },
        "sinks": sinks,
    });
    Ok(serde_yaml::to_string(&doc)?)
}

pub const POOLER_EXS: &str = r#"{:ok, _} = Application.ensure_all_started(:supavisor)

{:ok, version} =
  case Supavisor.Repo.query!("select version()") do
    %{rows: [[ver]]} -> Supavisor.Helpers.parse_pg_version(ver)
    _ -> nil
  end

params = %{
  "external_id" => System.get_env("POOLER_TENANT_ID"),
  "db_host" => "db",
  "db_port" => System.get_env("POSTGRES_PORT"),
  "db_database" => System.get_env("POSTGRES_DB"),
  "require_user" => false,
  "auth_query" => "SELECT * FROM pgbouncer.get_auth($1)",
  "default_max_clients" => System.get_env("POOLER_MAX_CLIENT_CONN"),
  "default_pool_size" => System.get_env("POOLER_DEFAULT_POOL_SIZE"),
  "default_parameter_status" => %{"server_version" => version},
  "users" => [%{
    "db_user" => "pgbouncer",
    "db_password" => System.get_env("POSTGRES_PASSWORD"),
    "mode_type" => System.get_env("POOLER_POOL_MODE"),
    "pool_size" => System.get_env("POOLER_DEFAULT_POOL_SIZE"),
    "is_manager" => true
  }]
}

if !Supavisor.Tenants.get_tenant_by_external_id(params["external_id"]) do
  {:ok, _} = Supavisor.Tenants.create_tenant(params)
end
"#;

pub const REALTIME_SQL: &str = r#"\set pguser `echo "$POSTGRES_USER"`

create schema if not exists _realtime;
alter schema _realtime owner to :pguser;
"#;

pub const JWT_SQL: &str = r#"\set jwt_secret `echo "$JWT_SECRET"`
\set jwt_exp `echo "$JWT_EXP"`

ALTER DATABASE postgres SET "app.settings.jwt_secret" TO :'jwt_secret';
ALTER DATABASE postgres SET "app.settings.jwt_exp" TO :'jwt_exp';
"#;

pub const SUPABASE_SQL: &str = r#"\set pguser `echo "$POSTGRES_USER"`

CREATE DATABASE _supabase WITH OWNER :pguser;
"#;

pub const LOGS_SQL: &str = r#"\set pguser `echo "$POSTGRES_USER"`

\c _supabase
create schema if not exists _analytics;
alter schema _analytics owner to :pguser;
\c postgres
"#;

pub const FUNCTION_MAIN: &str = r#"import { serve } from "https://deno.land/std@0.131.0/http/server.ts";

console.log("main function started");

serve(async (req) => {
  const { name } = await req.json().catch(() => ({ name: "World" }));
  return new Response(
    JSON.stringify({ message: `Hello ${name}!` }),
    { headers: { "Content-Type": "application/json" } },
  );
});
"#;

const COMPOSE_TEMPLATE: &str = r#"name: %NAME%

services:
  studio:
    container_name: %CONTAINER:studio%
    image: supabase/studio:20250317-6955350
    restart: unless-stopped
    ports:
      - "%PORT:admin_ui%:3000"
    healthcheck:
      test: ["CMD", "node", "-e", "fetch('http://studio:3000/api/platform/profile').then((r) => {if (r.status !== 200) throw new Error(r.status)})"]
      timeout: 10s
      interval: 5s
      retries: 3
    environment:
      STUDIO_PG_META_URL: http://meta:8080
      POSTGRES_PASSWORD: ${POSTGRES_PASSWORD}
      DEFAULT_ORGANIZATION_NAME: ${STUDIO_DEFAULT_ORGANIZATION}
      DEFAULT_PROJECT_NAME: ${STUDIO_DEFAULT_PROJECT}
      SUPABASE_URL: http://kong:8000
      SUPABASE_PUBLIC_URL: ${SUPABASE_PUBLIC_URL}
      SUPABASE_ANON_KEY: ${ANON_KEY}
      SUPABASE_SERVICE_KEY: ${SERVICE_ROLE_KEY}
      AUTH_JWT_SECRET: ${JWT_SECRET}
      LOGFLARE_API_KEY: ${LOGFLARE_API_KEY}
      LOGFLARE_URL: http://analytics:4000
      NEXT_PUBLIC_ENABLE_LOGS: "true"
      NEXT_ANALYTICS_BACKEND_PROVIDER: postgres
    depends_on:
      analytics:
        condition: service_healthy

  kong:
    container_name: %CONTAINER:kong%
    image: kong:2.8.1
    restart: unless-stopped
    ports:
      - "%PORT:gateway_http%:8000/tcp"
      - "%PORT:gateway_https%:8443/tcp"
    volumes:
      - ./volumes/api/kong.yml:/home/kong/temp.yml:ro,z
    depends_on:
      analytics:
        condition: service_healthy
    environment:
      KONG_DATABASE: "off"
      KONG_DECLARATIVE_CONFIG: /home/kong/kong.yml
      KONG_DNS_ORDER: LAST,A,CNAME
      KONG_PLUGINS: request-transformer,cors,key-auth,acl,basic-auth,rate-limiting
      KONG_NGINX_PROXY_PROXY_BUFFER_SIZE: 160k
      KONG_NGINX_PROXY_PROXY_BUFFERS: 64 160k
      SUPABASE_ANON_KEY: ${ANON_KEY}
      SUPABASE_SERVICE_KEY: ${SERVICE_ROLE_KEY}
      DASHBOARD_USERNAME: ${DASHBOARD_USERNAME}
      DASHBOARD_PASSWORD: ${DASHBOARD_PASSWORD}
    entrypoint: bash -c 'eval "echo \"$$(cat ~/temp.yml)\"" > ~/kong.yml && /docker-entrypoint.sh kong docker-start'

  auth:
    container_name: %CONTAINER:auth%
    image: supabase/gotrue:v2.170.0
    restart: unless-stopped
    healthcheck:
      test: ["CMD", "wget", "--no-verbose", "--tries=1", "--spider", "http://localhost:9999/health"]
      timeout: 5s
      interval: 5s
      retries: 3
    depends_on:
      db:
        condition: service_healthy
      analytics:
        condition: service_healthy
    environment:
      GOTRUE_API_HOST: 0.0.0.0
      GOTRUE_API_PORT: 9999
      API_EXTERNAL_URL: ${API_EXTERNAL_URL}
      GOTRUE_DB_DRIVER: postgres
      GOTRUE_DB_DATABASE_URL: postgres://supabase_auth_admin:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/${POSTGRES_DB}
      GOTRUE_SITE_URL: ${SITE_URL}
      GOTRUE_URI_ALLOW_LIST: ${ADDITIONAL_REDIRECT_URLS}
      GOTRUE_DISABLE_SIGNUP: ${DISABLE_SIGNUP}
      GOTRUE_JWT_ADMIN_ROLES: service_role
      GOTRUE_JWT_AUD: authenticated
      GOTRUE_JWT_DEFAULT_GROUP_NAME: authenticated
      GOTRUE_JWT_EXP: ${JWT_EXPIRY}
      GOTRUE_JWT_SECRET: ${JWT_SECRET}
      GOTRUE_EXTERNAL_EMAIL_ENABLED: ${ENABLE_EMAIL_SIGNUP}
      GOTRUE_EXTERNAL_ANONYMOUS_USERS_ENABLED: ${ENABLE_ANONYMOUS_USERS}
      GOTRUE_MAILER_AUTOCONFIRM: ${ENABLE_EMAIL_AUTOCONFIRM}
      GOTRUE_SMTP_ADMIN_EMAIL: ${SMTP_ADMIN_EMAIL}
      GOTRUE_SMTP_HOST: ${SMTP_HOST}
      GOTRUE_SMTP_PORT: ${SMTP_PORT}
      GOTRUE_SMTP_USER: ${SMTP_USER}
      GOTRUE_SMTP_PASS: ${SMTP_PASS}
      GOTRUE_SMTP_SENDER_NAME: ${SMTP_SENDER_NAME}
      GOTRUE_MAILER_URLPATHS_INVITE: ${MAILER_URLPATHS_INVITE}
      GOTRUE_MAILER_URLPATHS_CONFIRMATION: ${MAILER_URLPATHS_CONFIRMATION}
      GOTRUE_MAILER_URLPATHS_RECOVERY: ${MAILER_URLPATHS_RECOVERY}
      GOTRUE_MAILER_URLPATHS_EMAIL_CHANGE: ${MAILER_URLPATHS_EMAIL_CHANGE}
      GOTRUE_EXTERNAL_PHONE_ENABLED: ${ENABLE_PHONE_SIGNUP}
      GOTRUE_SMS_AUTOCONFIRM: ${ENABLE_PHONE_AUTOCONFIRM}

  rest:
    container_name: %CONTAINER:rest%
    image: postgrest/postgrest:v12.2.8
    restart: unless-stopped
    depends_on:
      db:
        condition: service_healthy
      analytics:
        condition: service_healthy
    environment:
      PGRST_DB_URI: postgres://authenticator:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/${POSTGRES_DB}
      PGRST_DB_SCHEMAS: ${PGRST_DB_SCHEMAS}
      PGRST_DB_ANON_ROLE: anon
      PGRST_JWT_SECRET: ${JWT_SECRET}
      PGRST_DB_USE_LEGACY_GUCS: "false"
      PGRST_APP_SETTINGS_JWT_SECRET: ${JWT_SECRET}
      PGRST_APP_SETTINGS_JWT_EXP: ${JWT_EXPIRY}
    command: ["postgrest"]

  realtime:
    container_name: %CONTAINER:realtime%
    image: supabase/realtime:v2.34.43
    restart: unless-stopped
    depends_on:
      db:
        condition: service_healthy
      analytics:
        condition: service_healthy
    healthcheck:
      test: ["CMD", "curl", "-sSfL", "--head", "-o", "/dev/null", "-H", "Authorization: Bearer ${ANON_KEY}", "http://localhost:4000/api/tenants/realtime-dev/health"]
      timeout: 5s
      interval: 5s
      retries: 3
    environment:
      PORT: 4000
      DB_HOST: ${POSTGRES_HOST}
      DB_PORT: 5432
      DB_USER: supabase_admin
      DB_PASSWORD: ${POSTGRES_PASSWORD}
      DB_NAME: ${POSTGRES_DB}
      DB_AFTER_CONNECT_QUERY: 'SET search_path TO _realtime'
      DB_ENC_KEY: supabaserealtime
      API_JWT_SECRET: ${JWT_SECRET}
      SECRET_KEY_BASE: ${SECRET_KEY_BASE}
      ERL_AFLAGS: -proto_dist inet_tcp
      DNS_NODES: "''"
      RLIMIT_NOFILE: "10000"
      APP_NAME: realtime
      SEED_SELF_HOST: "true"
      RUN_JANITOR: "true"

  storage:
    container_name: %CONTAINER:storage%
    image: supabase/storage-api:v1.19.3
    restart: unless-stopped
    volumes:
      - ./volumes/storage:/var/lib/storage:z
    healthcheck:
      test: ["CMD", "wget", "--no-verbose", "--tries=1", "--spider", "http://storage:5000/status"]
      timeout: 5s
      interval: 5s
      retries: 3
    depends_on:
      db:
        condition: service_healthy
      rest:
        condition: service_started
      imgproxy:
        condition: service_started
    environment:
      ANON_KEY: ${ANON_KEY}
      SERVICE_KEY: ${SERVICE_ROLE_KEY}
      POSTGREST_URL: http://rest:3000
      PGRST_JWT_SECRET: ${JWT_SECRET}
      DATABASE_URL: postgres://supabase_storage_admin:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/${POSTGRES_DB}
      FILE_SIZE_LIMIT: 52428800
      STORAGE_BACKEND: file
      FILE_STORAGE_BACKEND_PATH: /var/lib/storage
      TENANT_ID: stub
      REGION: stub
      GLOBAL_S3_BUCKET: stub
      ENABLE_IMAGE_TRANSFORMATION: "true"
      IMGPROXY_URL: http://imgproxy:5001

  imgproxy:
    container_name: %CONTAINER:imgproxy%
    image: darthsim/imgproxy:v3.8.0
    restart: unless-stopped
    volumes:
      - ./volumes/storage:/var/lib/storage:z
    healthcheck:
      test: ["CMD", "imgproxy", "health"]
      timeout: 5s
      interval: 5s
      retries: 3
    environment:
      IMGPROXY_BIND: ":5001"
      IMGPROXY_LOCAL_FILESYSTEM_ROOT: /
      IMGPROXY_USE_ETAG: "true"
      IMGPROXY_ENABLE_WEBP_DETECTION: ${IMGPROXY_ENABLE_WEBP_DETECTION}

  meta:
    container_name: %CONTAINER:meta%
    image: supabase/postgres-meta:v0.87.1
    restart: unless-stopped
    depends_on:
      db:
        condition: service_healthy
      analytics:
        condition: service_healthy
    environment:
      PG_META_PORT: 8080
      PG_META_DB_HOST: ${POSTGRES_HOST}
      PG_META_DB_PORT: 5432
      PG_META_DB_NAME: ${POSTGRES_DB}
      PG_META_DB_USER: supabase_admin
      PG_META_DB_PASSWORD: ${POSTGRES_PASSWORD}

  functions:
    container_name: %CONTAINER:functions%
    image: supabase/edge-runtime:v1.67.4
    restart: unless-stopped
    volumes:
      - ./volumes/functions:/home/deno/functions:Z
    depends_on:
      analytics:
        condition: service_healthy
    environment:
      JWT_SECRET: ${JWT_SECRET}
      SUPABASE_URL: http://kong:8000
      SUPABASE_ANON_KEY: ${ANON_KEY}
      SUPABASE_SERVICE_ROLE_KEY: ${SERVICE_ROLE_KEY}
      SUPABASE_DB_URL: postgresql://postgres:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/${POSTGRES_DB}
      VERIFY_JWT: "${FUNCTIONS_VERIFY_JWT}"
    command: ["start", "--main-service", "/home/deno/functions/main"]

  analytics:
    container_name: %CONTAINER:analytics%
    image: supabase/logflare:1.12.0
    restart: unless-stopped
    ports:
      - "%PORT:telemetry%:4000"
    healthcheck:
      test: ["CMD", "curl", "http://localhost:4000/health"]
      timeout: 5s
      interval: 5s
      retries: 10
    depends_on:
      db:
        condition: service_healthy
    environment:
      LOGFLARE_NODE_HOST: 127.0.0.1
      DB_USERNAME: supabase_admin
      DB_DATABASE: _supabase
      DB_HOSTNAME: ${POSTGRES_HOST}
      DB_PORT: 5432
      DB_PASSWORD: ${POSTGRES_PASSWORD}
      DB_SCHEMA: _analytics
      LOGFLARE_API_KEY: ${LOGFLARE_API_KEY}
      LOGFLARE_SINGLE_TENANT: "true"
      LOGFLARE_SUPABASE_MODE: "true"
      LOGFLARE_MIN_CLUSTER_SIZE: 1
      POSTGRES_BACKEND_URL: postgresql://supabase_admin:${POSTGRES_PASSWORD}@${POSTGRES_HOST}:5432/_supabase
      POSTGRES_BACKEND_SCHEMA: _analytics
      LOGFLARE_FEATURE_FLAG_OVERRIDE: multibackend=true

  db:
    container_name: %CONTAINER:db%
    image: supabase/postgres:15.8.1.060
    restart: unless-stopped
    volumes:
      - ./volumes/db/realtime.sql:/docker-entrypoint-initdb.d/migrations/99-realtime.sql:Z
      - ./volumes/db/jwt.sql:/docker-entrypoint-initdb.d/init-scripts/99-jwt.sql:Z
      - ./volumes/db/_supabase.sql:/docker-entrypoint-initdb.d/migrations/97-_supabase.sql:Z
      - ./volumes/db/logs.sql:/docker-entrypoint-initdb.d/migrations/99-logs.sql:Z
      - ./volumes/db/data:/var/lib/postgresql/data:Z
      - db-config:/etc/postgresql-custom
    healthcheck:
      test: ["CMD", "pg_isready", "-U", "postgres", "-h", "localhost"]
      interval: 5s
      timeout: 5s
      retries: 10
    depends_on:
      vector:
        condition: service_healthy
    ports:
      - "%PORT:database%:5432"
    environment:
      POSTGRES_HOST: /var/run/postgresql
      PGPORT: 5432
      POSTGRES_PORT: 5432
      PGPASSWORD: ${POSTGRES_PASSWORD}
      POSTGRES_PASSWORD: ${POSTGRES_PASSWORD}
      PGDATABASE: ${POSTGRES_DB}
      POSTGRES_DB: ${POSTGRES_DB}
      JWT_SECRET: ${JWT_SECRET}
      JWT_EXP: ${JWT_EXPIRY}
    command: ["postgres", "-c", "config_file=/etc/postgresql/postgresql.conf", "-c", "log_min_messages=fatal"]

  vector:
    container_name: %CONTAINER:vector%
    image: timberio/vector:0.28.1-alpine
    restart: unless-stopped
    volumes:
      - ./volumes/logs/vector.yml:/etc/vector/vector.yml:ro,z
      - ${DOCKER_SOCKET_LOCATION}:/var/run/docker.sock:ro,z
    healthcheck:
      test: ["CMD", "wget", "--no-verbose", "--tries=1", "--spider", "http://vector:9001/health"]
      timeout: 5s
      interval: 5s
      retries: 3
    environment:
      LOGFLARE_API_KEY: ${LOGFLARE_API_KEY}
    command: ["--config", "/etc/vector/vector.yml"]
    security_opt:
      - "label=disable"

  pooler:
    container_name: %CONTAINER:pooler%
    image: supabase/supavisor:2.4.14
    restart: unless-stopped
    ports:
      - "%PORT:pool_proxy%:6543"
    volumes:
      - ./volumes/pooler/pooler.exs:/etc/pooler/pooler.exs:ro,z
    healthcheck:
      test: ["CMD", "curl", "-sSfL", "--head", "-o", "/dev/null", "http://127.0.0.1:4000/api/health"]
      interval: 10s
      timeout: 5s
      retries: 5
    depends_on:
      db:
        condition: service_healthy
      analytics:
        condition: service_healthy
    environment:
      PORT: 4000
      POSTGRES_PORT: 5432
      POSTGRES_DB: ${POSTGRES_DB}
      POSTGRES_PASSWORD: ${POSTGRES_PASSWORD}
      DATABASE_URL: ecto://supabase_admin:${POSTGRES_PASSWORD}@db:5432/_supabase
      CLUSTER_POSTGRES: "true"
      SECRET_KEY_BASE: ${SECRET_KEY_BASE}
      VAULT_ENC_KEY: ${VAULT_ENC_KEY}
      API_JWT_SECRET: ${JWT_SECRET}
      METRICS_JWT_SECRET: ${JWT_SECRET}
      REGION: local
      ERL_AFLAGS: -proto_dist inet_tcp
      POOLER_TENANT_ID: ${POOLER_TENANT_ID}
      POOLER_DEFAULT_POOL_SIZE: ${POOLER_DEFAULT_POOL_SIZE}
      POOLER_MAX_CLIENT_CONN: ${POOLER_MAX_CLIENT_CONN}
      POOLER_POOL_MODE: transaction
    command: ["/bin/sh", "-c", "/app/bin/migrate && /app/bin/supavisor eval \"$$(cat /etc/pooler/pooler.exs)\" && /app/bin/server"]

volumes:
  db-config:

networks:
  default:
    name: %NAME%-network
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> PortSet {
        PortSet {
            gateway_http: 8000,
            gateway_https: 8443,
            admin_ui: 10000,
            database: 9000,
            pool_proxy: 9001,
            telemetry: 11000,
        }
    }

    #[test]
    fn container_names_follow_instance_prefix() {
        let names: Vec<String> = STACK_SERVICES
            .iter()
            .map(|s| container_name("demo", s))
            .collect();
        insta::assert_snapshot!(names.join("\n"), @r"
        demo-vector
        demo-db
        demo-analytics
        demo-auth
        demo-rest
        realtime-dev.demo-realtime
        demo-imgproxy
        demo-storage
        demo-meta
        demo-edge-functions
        demo-pooler
        demo-kong
        demo-studio
        ");
    }

    #[test]
    fn realtime_container_encodes_tenant_as_subdomain() {
        let name = container_name("shop-prod", "realtime");
        let pattern = Regex::new(r"^realtime-dev\.[a-z0-9][a-z0-9-]*-realtime$").unwrap();
        assert!(pattern.is_match(&name), "{name}");
        let tenant = name.split('.').next().unwrap();
        assert_eq!(tenant, REALTIME_TENANT);
    }

    #[test]
    fn compose_has_no_unfilled_placeholders() {
        let compose = render_compose("demo", &ports());
        assert!(!PLACEHOLDER_RE.is_match(&compose));
        assert!(compose.starts_with("name: demo\n"));
        assert!(compose.contains("container_name: realtime-dev.demo-realtime"));
        assert!(compose.contains("\"8000:8000/tcp\""));
        assert!(compose.contains("\"10000:3000\""));
        assert!(compose.contains("\"9001:6543\""));
        // Compose's own variable syntax must pass through untouched.
        assert!(compose.contains("${POSTGRES_PASSWORD}"));
    }

    #[test]
    fn compose_is_valid_yaml_with_every_service() {
        let compose = render_compose("demo", &ports());
        let doc: serde_yaml::Value = serde_yaml::from_str(&compose).unwrap();
        assert_eq!(
            doc["services"].as_mapping().unwrap().len(),
            STACK_SERVICES.len()
        );
        for service in STACK_SERVICES {
            let declared = doc["services"][*service]["container_name"].as_str().unwrap();
            assert_eq!(declared, container_name("demo", service));
        }
    }

    #[test]
    fn kong_routes_carry_cors_origins() {
        let origins = cors_origins(&ports(), &["https://app.example.com".to_string()]);
        let kong = render_kong(&origins).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&kong).unwrap();
        let services = doc["services"].as_sequence().unwrap();
        assert_eq!(services.len(), ROUTES.len());
        let realtime = services
            .iter()
            .find(|s| s["name"].as_str() == Some("realtime"))
            .unwrap();
        assert_eq!(realtime["url"].as_str(), Some("http://realtime:4000/socket/"));
        let allowed: Vec<&str> = realtime["plugins"][0]["config"]["origins"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|o| o.as_str())
            .collect();
        assert_eq!(
            allowed,
            vec![
                "http://localhost:10000",
                "http://localhost:8000",
                "https://app.example.com"
            ]
        );
    }

    #[test]
    fn auth_routes_are_rate_limited() {
        let kong = render_kong(&cors_origins(&ports(), &[])).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&kong).unwrap();
        for service in doc["services"].as_sequence().unwrap() {
            let name = service["name"].as_str().unwrap();
            let limited = service["plugins"]
                .as_sequence()
                .unwrap()
                .iter()
                .find(|p| p["name"].as_str() == Some(RATE_LIMIT_PLUGIN));
            if name.starts_with("auth-v1") {
                let plugin = limited.unwrap_or_else(|| panic!("{name} has no rate limit"));
                assert_eq!(plugin["config"]["minute"].as_u64(), Some(100));
                assert_eq!(plugin["config"]["policy"].as_str(), Some("local"));
            } else {
                assert!(limited.is_none(), "{name} should not be rate limited");
            }
        }
        assert!(render_compose("demo", &ports()).contains("basic-auth,rate-limiting"));
    }

    #[test]
    fn vector_routes_match_container_names() {
        let vector = render_vector("demo").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&vector).unwrap();
        let route = &doc["transforms"]["router"]["route"];
        assert_eq!(
            route["realtime"].as_str(),
            Some(".appname == \"realtime-dev.demo-realtime\"")
        );
        assert_eq!(route["kong"].as_str(), Some(".appname == \"demo-kong\""));
        assert!(doc["sinks"]["logflare_db"]["uri"]
            .as_str()
            .unwrap()
            .contains("source_name=postgres.logs"));
    }
}
