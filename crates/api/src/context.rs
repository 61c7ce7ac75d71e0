use portal_core::{Account, StudentNumber};

/// Authenticated student for a request.
///
/// Inserted by the auth middleware after the token's subject was resolved
/// against the account store, so handlers never see a dangling subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentContext {
    account: Account,
}

impl StudentContext {
    pub fn new(account: Account) -> Self {
        Self { account }
    }

    pub fn student_number(&self) -> &StudentNumber {
        &self.account.student_number
    }

    pub fn account(&self) -> &Account {
        &self.account
    }
}
