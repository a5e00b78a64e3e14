// Licensed under the Open Software License version 3.0
pub mod executor;
pub mod types;
