use crate::error::ApiErrorBody;
use crate::models::{PostView, PostsResponse, SubmitPost, SubmitResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_post,
        crate::routes::list_posts,
    ),
    components(schemas(
        SubmitPost, SubmitResponse, PostView, PostsResponse, ApiErrorBody
    )),
    tags(
        (name = "posts", description = "Submit and list bulletin-board posts"),
    )
)]
pub struct ApiDoc;
