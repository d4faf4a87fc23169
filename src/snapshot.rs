//! Serializable model state: configuration, encoder, gene table and per-cell posteriors.
//!
//! Encoding to bytes is left to the caller (any serde format works).

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::CountData;
use crate::encoder::{encoder_features, Encoder};
use crate::model::{ModelConfig, VelocityModel};
use crate::params::{GeneKinetics, GeneParams};
use crate::Result;

/// Log-normal posterior parameters of every cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorParams {
    pub mu: Array1<f64>,
    pub sigma: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub model_config: ModelConfig,
    pub encoder: Encoder,
    pub genes: GeneParams,
    pub posterior: PosteriorParams,
}

impl ModelSnapshot {
    /// Capture `model` together with the posterior of every cell in `data`.
    pub fn capture(model: &VelocityModel, data: &CountData) -> Result<Self> {
        let x = encoder_features(data.unspliced(), data.spliced(), model.genes.scaling.view())?;
        let pass = model.encoder.forward(x.view())?;
        Ok(Self {
            model_config: model.config.clone(),
            encoder: model.encoder.clone(),
            genes: model.genes.clone(),
            posterior: PosteriorParams {
                mu: pass.mu,
                sigma: pass.sigma,
            },
        })
    }

    /// Rebuild the model (validated).
    pub fn to_model(&self) -> Result<VelocityModel> {
        VelocityModel::new(
            self.model_config.clone(),
            self.encoder.clone(),
            self.genes.clone(),
        )
    }

    pub fn kinetics(&self) -> Vec<GeneKinetics> {
        (0..self.genes.n_genes()).map(|g| self.genes.kinetics(g)).collect()
    }
}
