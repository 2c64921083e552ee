//! Scaler models: fixed channel counts over [`GenScaler`].

use super::GenScaler;
use crate::error::AppResult;
use crate::module::ModuleIdentity;

/// 16-channel scaler, model 560.
pub const SCALER_560: u32 = 560;
/// 16-channel scaler, model 1151.
pub const SCALER_1151: u32 = 1151;
/// 32-channel scaler, model 3800.
pub const SCALER_3800: u32 = 3800;
/// 32-channel scaler, model 3801.
pub const SCALER_3801: u32 = 3801;

/// Model 560 scaler.
pub fn scaler_560(identity: ModuleIdentity) -> AppResult<GenScaler> {
    GenScaler::new(identity, SCALER_560, "Scaler560", 16)
}

/// Model 1151 scaler.
pub fn scaler_1151(identity: ModuleIdentity) -> AppResult<GenScaler> {
    GenScaler::new(identity, SCALER_1151, "Scaler1151", 16)
}

/// Model 3800 scaler.
pub fn scaler_3800(identity: ModuleIdentity) -> AppResult<GenScaler> {
    GenScaler::new(identity, SCALER_3800, "Scaler3800", 32)
}

/// Model 3801 scaler.
pub fn scaler_3801(identity: ModuleIdentity) -> AppResult<GenScaler> {
    GenScaler::new(identity, SCALER_3801, "Scaler3801", 32)
}
