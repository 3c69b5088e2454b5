use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  base-url: {}", self.base_url());
        println!("  api-version: {}", self.api_version());
        println!("  request-timeout: {}s", self.request_timeout().as_secs());
        println!("  default-models: {}", self.default_models().join(", "));
        println!("  default-title: {}", self.default_title());
        println!("  title-max-chars: {}", self.title_max_chars());
        match self.token() {
            Some(_) => println!("  token: (set)"),
            None => println!("  token: (unset)"),
        }
    }
}
