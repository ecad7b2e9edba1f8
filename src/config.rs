use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub backup_dir: String,
    pub base_url: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    /// Optional URL that receives a JSON notification after each applied
    /// transition (fired post-commit, never inside the transaction).
    pub notify_webhook_url: Option<String>,
    pub backup_retention_days: i64,
    pub webhook_retention_days: i64,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PAYLINE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        // The webhook signing secret must never be hard-coded. In dev mode a
        // placeholder is tolerated so the server can boot without gateway
        // credentials; in production missing secrets are a startup error.
        let razorpay_webhook_secret = match env::var("RAZORPAY_WEBHOOK_SECRET") {
            Ok(s) => s,
            Err(_) if dev_mode => {
                tracing::warn!("RAZORPAY_WEBHOOK_SECRET not set, using dev placeholder");
                "whsec_dev_placeholder".to_string()
            }
            Err(_) => panic!("RAZORPAY_WEBHOOK_SECRET must be set"),
        };

        let razorpay_key_id = env::var("RAZORPAY_KEY_ID").unwrap_or_else(|_| {
            if !dev_mode {
                tracing::warn!("RAZORPAY_KEY_ID not set, outbound gateway calls will fail");
            }
            "rzp_test_placeholder".to_string()
        });
        let razorpay_key_secret =
            env::var("RAZORPAY_KEY_SECRET").unwrap_or_else(|_| "secret_placeholder".to_string());

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "payline.db".to_string()),
            backup_dir: env::var("BACKUP_DIR").unwrap_or_else(|_| "backups".to_string()),
            base_url,
            razorpay_key_id,
            razorpay_key_secret,
            razorpay_webhook_secret,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            backup_retention_days: env::var("BACKUP_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            webhook_retention_days: env::var("WEBHOOK_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
