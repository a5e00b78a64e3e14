// Licensed under the Open Software License version 3.0

// Original
pub use rups::tokio::Connection;

// ##########

// Mock implementation for testing
#[cfg(test)]
use rups::{ClientError, NutError, Variable};
#[cfg(test)]
use std::collections::HashMap;

#[cfg(test)]
pub struct MockConnection {
    fail_next: bool,
}

#[cfg(test)]
impl MockConnection {
    pub async fn new(_: &rups::Config) -> Result<Self, ClientError> {
        Ok(Self { fail_next: false })
    }

    /// Test hook: makes the next command fail, simulating a dropped socket.
    pub fn set_fail_next(&mut self, fail: bool) {
        self.fail_next = fail;
    }

    fn mock_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("ups.status", "OL"),
            ("battery.charge", "100"),
            ("battery.charge.low", "30"),
            ("battery.runtime", "1800"),
            ("battery.runtime.low", "300"),
            ("input.voltage", "230.0"),
            ("ups.load", "15"),
        ])
    }

    pub async fn get_var(
        &mut self,
        _ups_name: &str,
        variable_to_get: &str,
    ) -> Result<Variable, ClientError> {
        if self.fail_next {
            return Err(ClientError::Nut(NutError::AccessDenied));
        }
        match Self::mock_vars().get(variable_to_get) {
            Some(value) => Ok(Variable::Other((
                String::from(variable_to_get),
                String::from(*value),
            ))),
            None => Err(ClientError::Nut(NutError::VarNotSupported)),
        }
    }

    pub async fn list_ups(&mut self) -> Result<Vec<(String, String)>, ClientError> {
        if self.fail_next {
            return Err(ClientError::Nut(NutError::AccessDenied));
        }
        Ok(vec![(String::from("ups1"), String::from("Mock UPS"))])
    }

    pub async fn get_server_version(&mut self) -> Result<String, ClientError> {
        if self.fail_next {
            return Err(ClientError::Nut(NutError::AccessDenied));
        }
        Ok(String::from("Fake server 1.0"))
    }
}
