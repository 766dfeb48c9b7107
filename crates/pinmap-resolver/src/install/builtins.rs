//! Node.js built-in module names

/// Built-ins served from the stdlib package under `nodelibs/<name>`
pub const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// The built-in a specifier names, with any `node:` prefix removed
pub fn builtin_name(name: &str) -> Option<&str> {
    let bare = name.strip_prefix("node:").unwrap_or(name);
    NODE_BUILTINS.contains(&bare).then_some(bare)
}

pub fn is_builtin(name: &str) -> bool {
    builtin_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_name("fs"), Some("fs"));
        assert_eq!(builtin_name("node:path"), Some("path"));
        assert_eq!(builtin_name("fs/promises"), Some("fs/promises"));
        assert_eq!(builtin_name("react"), None);
        assert!(!is_builtin("node:react"));
    }
}
