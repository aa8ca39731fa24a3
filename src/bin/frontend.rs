#[macro_use]
extern crate log;

#[tokio::main]
async fn main() -> Result<(), rocket::Error> {
    pretty_env_logger::init();

    let app = docsign::setup().await;

    info!("DocSign frontend starting...");

    app.rocket
        .attach(docsign::DbConn::fairing())
        .manage(app.celery_app)
        .mount(
            "/",
            rocket::routes![
                docsign::views::upload_document,
                docsign::views::list_documents,
                docsign::views::get_document,
                docsign::views::add_field,
                docsign::views::update_field,
                docsign::views::delete_field,
                docsign::views::send_document,
                docsign::views::sign_field,
                docsign::views::sign_public_field,
                docsign::views::decline_document,
                docsign::views::decline_public_document,
                docsign::views::recall_document,
                docsign::views::document_audit,
                docsign::views::download_document,
                docsign::views::get_public_document,
                docsign::views::uploads,
            ],
        )
        .launch()
        .await
        .map(|_| ())
}
