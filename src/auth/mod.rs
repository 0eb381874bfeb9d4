// 认证模块
//
// 123 开放平台使用 clientID/clientSecret 直接换取 access_token（JWT 模式，无 refresh_token）

pub mod token;
pub mod types;

pub use token::TokenProvider;
pub use types::Credentials;
