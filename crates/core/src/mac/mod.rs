/// Lazily parses a value from an environment variable, falling back to a
/// default when the variable is unset or fails to parse.
#[macro_export]
macro_rules! lazy_env_parse {
	($key:expr, $t:ty, $default:expr) => {
		once_cell::sync::Lazy::new(|| {
			std::env::var($key)
				.map(|s| s.parse::<$t>().unwrap_or($default))
				.unwrap_or($default)
		})
	};
}
