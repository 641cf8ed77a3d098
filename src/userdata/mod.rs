//! User-data rendering
//!
//! Produces the instance user data for a bastion: a self-contained bash
//! provisioning script, base64-embedded in a `#!/bin/bash` wrapper so it
//! survives any quoting the infrastructure layer applies. Optionally gzip
//! compressed, which cloud-init detects by its magic bytes.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::Compression;
use flate2::write::GzEncoder;
use minijinja::{Environment, context};
use std::io::Write;
use tracing::debug;

use crate::BastionError;
use crate::config::ProvisionerConfig;
use crate::secrets::SecretRef;

const PROVISION_TEMPLATE: &str = include_str!("provision.sh.j2");

/// Quote a string for bash: `'...'` with embedded quotes as `'\''`
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Shell command printing the secret `reference` to stdout
pub fn fetch_command(reference: &SecretRef) -> String {
    match reference {
        SecretRef::Managed(id) => format!(
            "aws secretsmanager get-secret-value --secret-id {} --query SecretString --output text",
            shell_quote(id)
        ),
        SecretRef::Env(name) => format!("printenv {}", shell_quote(name)),
        SecretRef::File(path) => format!("cat {}", shell_quote(&path.to_string_lossy())),
    }
}

/// Render the bash provisioning script for `config`
pub fn render_script(config: &ProvisionerConfig) -> Result<String, BastionError> {
    config.validate()?;

    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_template("provision.sh", PROVISION_TEMPLATE)?;

    let tmpl = env.get_template("provision.sh")?;
    let script = tmpl.render(context! {
        proxy_user_name => shell_quote(&config.proxy_user),
        allow_shell => config.allow_shell,
        block_metadata_service => config.block_metadata_service,
        public_keys => config.public_keys.join(" "),
        ed25519_fetch => config.ed25519_host_key.as_ref().map(fetch_command),
        ecdsa_fetch => config.ecdsa_host_key.as_ref().map(fetch_command),
    })?;

    debug!("Rendered provisioning script ({} bytes)", script.len());
    Ok(script)
}

/// Render the full user data for `config`
///
/// With no public keys, no host keys and no metadata lockdown there is
/// nothing for the script to do, so the user data only says so.
pub fn render_user_data(config: &ProvisionerConfig) -> Result<String, BastionError> {
    let mut user_data = String::from("#!/bin/bash\n");

    if !has_work(config) {
        user_data.push_str("echo \"No public keys to add\"\n");
        return Ok(user_data);
    }

    let script = render_script(config)?;
    let encoded = BASE64.encode(script.as_bytes());
    user_data.push_str(&format!("echo \"{}\" | base64 -d | bash\n", encoded));
    Ok(user_data)
}

fn has_work(config: &ProvisionerConfig) -> bool {
    !config.public_keys.is_empty() || config.has_host_keys() || config.block_metadata_service
}

/// Gzip user data
pub fn compress_user_data(user_data: &str) -> Result<Vec<u8>, BastionError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(user_data.as_bytes())?;
    Ok(encoder.finish()?)
}
