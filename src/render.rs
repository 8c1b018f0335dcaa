//! Proxy configuration rendering.
//!
//! Rendering is a pure function of its inputs: no filesystem access, no
//! environment lookups. Paths are emitted with forward slashes whatever the
//! host separator is. Path contents are not escaped, so a project root
//! containing `;`, `#` or `"` produces a config the proxy will reject.

use std::path::Path;

pub const DEFAULT_LISTEN_PORT: u16 = 8081;
pub const DEFAULT_SERVER_NAME: &str = "localhost";
pub const DEFAULT_BACKEND_ADDRESS: &str = "127.0.0.1:9123";

/// Network endpoints baked into the generated virtual host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub listen_port: u16,
    pub server_name: String,
    pub backend_address: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            backend_address: DEFAULT_BACKEND_ADDRESS.to_string(),
        }
    }
}

pub fn render(
    endpoints: &Endpoints,
    install_path: &Path,
    project_root: &Path,
    work_dir: &Path,
    pid_file: &Path,
) -> String {
    let install = normalize_separators(install_path);
    let root = normalize_separators(project_root);
    let work = normalize_separators(work_dir);
    let pid = normalize_separators(pid_file);
    let Endpoints {
        listen_port,
        server_name,
        backend_address,
    } = endpoints;

    format!(
        r#"worker_processes  1;

error_log  "{work}/logs/error.log";
pid        "{pid}";

events {{
    worker_connections  1024;
}}

http {{
    include "{install}/conf/mime.types";
    default_type  application/octet-stream;
    client_body_temp_path "{install}/temp/nginx-client-body";
    proxy_temp_path "{install}/temp/nginx-proxy";
    fastcgi_temp_path "{install}/temp/nginx-fastcgi";
    uwsgi_temp_path "{install}/temp/nginx-uwsgi";
    scgi_temp_path "{install}/temp/nginx-scgi";

    access_log  "{work}/logs/site-access.log";
    error_log  "{work}/logs/site-error.log";

    server {{
        listen       {listen_port};
        server_name  {server_name};

        location / {{
            root {root};
            index   index.html index.htm;
            fastcgi_pass   {backend_address};
            fastcgi_index  index.php;
            fastcgi_param SCRIPT_FILENAME $document_root/index.php;
            include        {install}/conf/fastcgi_params;
        }}
    }}
}}
"#
    )
}

/// Forward slashes only, no trailing separator (except for a bare root).
fn normalize_separators(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() && !text.is_empty() {
        return "/".to_string();
    }
    trimmed.to_string()
}
