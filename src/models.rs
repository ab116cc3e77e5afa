use serde::{Serialize, Deserialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ImageList {
    pub images: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}
