use std::sync::Arc;

use fara_service::FaraService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<FaraService>,
}
impl AppState {
	pub async fn new(config: fara_config::Config) -> color_eyre::Result<Self> {
		let service = FaraService::from_config(config).await?;

		Ok(Self::with_service(service))
	}

	pub fn with_service(service: FaraService) -> Self {
		Self { service: Arc::new(service) }
	}
}
