//! Business logic and external collaborators

pub mod cert_status;
pub mod importer;
pub mod mailer;
pub mod matching;
pub mod ocr;
pub mod oauth;
pub mod permissions;
pub mod reports;
pub mod twilio;
pub mod vision;

pub use mailer::{Mailer, SmtpMailer};
pub use oauth::{GoogleOAuth, OAuthProvider};
pub use twilio::{MediaFetcher, TwilioMediaFetcher};
pub use vision::{OpenAiVisionClient, VisionClient};
