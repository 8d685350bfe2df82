/// Single-use token flows
///
/// Each flow pairs a payload with a `Redemption` and a way to start it.

mod email_change;
mod invitation;
mod password_reset;

pub use email_change::{request_email_change, ConfirmEmailChange, EmailChangePayload};
pub use invitation::{invite, AcceptInvitation, InvitationPayload};
pub use password_reset::{request_password_reset, PasswordResetPayload, ResetPassword};
