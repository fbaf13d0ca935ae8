// Library root
// -----------
// This crate copies the files of one Drive folder into another. The
// binary (`main.rs`) wires configuration into the two halves below.
//
// Module responsibilities:
// - `auth`: the credential manager; loads, refreshes or authorizes a
//   token and hands back a `Session`.
// - `oauth`, `credentials`, `token`: the installed-app OAuth flow, the
//   client registration file and the persisted token.
// - `api`: blocking Drive client behind the `DriveApi` trait.
// - `transfer`: the sequencer that downloads then uploads each file in
//   listing order.
// - `ui`: console reporting for a transfer run.
// - `config`, `error`: explicit configuration and per-operation errors.
pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod oauth;
pub mod token;
pub mod transfer;
pub mod ui;
