use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("store entity '{entity}' with id '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
