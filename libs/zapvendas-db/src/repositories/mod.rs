pub mod conversation_repo;
pub mod flow_repo;
pub mod product_repo;
pub mod redeem_repo;
pub mod settings_repo;
pub mod subscription_repo;
pub mod transaction_repo;
pub mod user_repo;

pub use conversation_repo::ConversationRepository;
pub use flow_repo::FlowRepository;
pub use product_repo::ProductRepository;
pub use redeem_repo::RedeemCodeRepository;
pub use settings_repo::ResponseSettingsRepository;
pub use subscription_repo::SubscriptionRepository;
pub use transaction_repo::TransactionRepository;
pub use user_repo::UserRepository;
