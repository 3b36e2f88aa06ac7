use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_DATA_DIR: &str = "./data";

/// Default number of leading zero bits a block digest must carry. Fixed for
/// the life of the process; changing it invalidates previously mined blocks.
pub const DEFAULT_MINING_DIFFICULTY: u64 = 16;

const DATA_DIR_KEY: &str = "DATA_DIR";
const MINING_DIFFICULTY_KEY: &str = "MINING_DIFFICULTY";

const DATA_DIR_ENV: &str = "ANVIL_DATA_DIR";
const MINING_DIFFICULTY_ENV: &str = "ANVIL_DIFFICULTY";

pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();

        let data_dir = env::var(DATA_DIR_ENV).unwrap_or_else(|_| String::from(DEFAULT_DATA_DIR));
        map.insert(String::from(DATA_DIR_KEY), data_dir);

        if let Ok(difficulty) = env::var(MINING_DIFFICULTY_ENV) {
            map.insert(String::from(MINING_DIFFICULTY_KEY), difficulty);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    pub fn get_data_dir(&self) -> String {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner
            .get(DATA_DIR_KEY)
            .expect("Data directory should always be present in config")
            .clone()
    }

    pub fn set_data_dir(&self, dir: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config");
        inner.insert(String::from(DATA_DIR_KEY), dir);
    }

    /// Mining difficulty in leading zero bits out of 256. Values that fail to
    /// parse or fall outside (0, 256) fall back to the default.
    pub fn get_mining_difficulty(&self) -> u64 {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config");
        inner
            .get(MINING_DIFFICULTY_KEY)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|d| (1..256).contains(d))
            .unwrap_or(DEFAULT_MINING_DIFFICULTY)
    }

    pub fn set_mining_difficulty(&self, difficulty: u64) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config");
        inner.insert(String::from(MINING_DIFFICULTY_KEY), difficulty.to_string());
    }
}
