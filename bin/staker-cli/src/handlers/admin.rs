//! Administrative handlers: config dump and keyring creation.

use std::path::Path;

use anyhow::bail;
use staker_coordinator::Keyring;

/// Default configuration template written by `admin dump-config`.
const DEFAULT_CONFIG: &str = r#"# stakerd configuration

network = "signet"
datadir = ".stakerd"
rpc_addr = "127.0.0.1:9740"

[btc_node]
url = "http://127.0.0.1:38332"
user = "user"
pass = "password"
retry_count = 3
retry_interval = 1000
poll_interval_secs = 5

[wallet]
url = "http://127.0.0.1:38332/wallet/staker"
user = "user"
pass = "password"
# passphrase = "..."

[coordinator]
rpc_addr = "http://127.0.0.1:26657"
keyring_path = "coordinator.key"

[db]
max_retry_count = 3
backoff_period = { secs = 0, nanos = 200000000 }

[fee]
static_fee_rate_sat_per_kvb = 2000
"#;

pub(crate) fn dump_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("config file {} already exists", path.display());
    }

    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("wrote default config to {}", path.display());
    Ok(())
}

pub(crate) fn create_keyring(path: &Path) -> anyhow::Result<()> {
    let keyring = Keyring::generate(path)?;
    println!(
        "wrote coordinator keyring to {} (public key {})",
        path.display(),
        keyring.public_key()
    );
    Ok(())
}
