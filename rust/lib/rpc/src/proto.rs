//! Wire schema for `lobby.BucketService`.
//!
//! Messages and service stubs are written by hand against prost and tonic's
//! codegen types so the build does not need `protoc`. They mirror
//! `proto/bucket.proto` field for field.

/// A key value pair.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Item {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// An item addressed to a bucket, sent on the Put stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NewItem {
    #[prost(string, tag = "1")]
    pub bucket: String,

    #[prost(message, optional, tag = "2")]
    pub item: Option<Item>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Key {
    #[prost(string, tag = "1")]
    pub bucket: String,

    #[prost(string, tag = "2")]
    pub key: String,
}

/// Pagination request. `page` is 1-indexed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Page {
    #[prost(string, tag = "1")]
    pub bucket: String,

    #[prost(int32, tag = "2")]
    pub page: i32,

    #[prost(int32, tag = "3")]
    pub per_page: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}

pub const SERVICE_NAME: &str = "lobby.BucketService";

/// Client stub.
pub mod bucket_service_client {
    use super::{Empty, Item, Key, NewItem, Page, SERVICE_NAME};
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct BucketServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl BucketServiceClient<tonic::transport::Channel> {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
    }

    impl<T> BucketServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        async fn ready(&mut self) -> std::result::Result<(), tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unavailable(format!("service not ready: {}", e.into()))
            })
        }

        /// Client-streaming put. The call completes after the request stream
        /// ends and the server acknowledges.
        pub async fn put(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = NewItem>,
        ) -> std::result::Result<tonic::Response<Empty>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/lobby.BucketService/Put");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE_NAME, "Put"));
            self.inner.client_streaming(req, path, codec).await
        }

        pub async fn get(
            &mut self,
            request: impl tonic::IntoRequest<Key>,
        ) -> std::result::Result<tonic::Response<Item>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/lobby.BucketService/Get");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE_NAME, "Get"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn delete(
            &mut self,
            request: impl tonic::IntoRequest<Key>,
        ) -> std::result::Result<tonic::Response<Empty>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/lobby.BucketService/Delete");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE_NAME, "Delete"));
            self.inner.unary(req, path, codec).await
        }

        /// Server-streaming list of one page.
        pub async fn list(
            &mut self,
            request: impl tonic::IntoRequest<Page>,
        ) -> std::result::Result<tonic::Response<tonic::codec::Streaming<Item>>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/lobby.BucketService/List");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE_NAME, "List"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}

/// Server stub.
pub mod bucket_service_server {
    use super::{Empty, Item, Key, NewItem, Page, SERVICE_NAME};
    use tonic::codegen::*;

    /// Implemented by anything that serves buckets over the wire.
    #[tonic::async_trait]
    pub trait BucketService: std::marker::Send + std::marker::Sync + 'static {
        async fn put(
            &self,
            request: tonic::Request<tonic::Streaming<NewItem>>,
        ) -> std::result::Result<tonic::Response<Empty>, tonic::Status>;

        async fn get(
            &self,
            request: tonic::Request<Key>,
        ) -> std::result::Result<tonic::Response<Item>, tonic::Status>;

        async fn delete(
            &self,
            request: tonic::Request<Key>,
        ) -> std::result::Result<tonic::Response<Empty>, tonic::Status>;

        type ListStream: futures::Stream<Item = std::result::Result<Item, tonic::Status>>
            + std::marker::Send
            + 'static;

        async fn list(
            &self,
            request: tonic::Request<Page>,
        ) -> std::result::Result<tonic::Response<Self::ListStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct BucketServiceServer<T: BucketService> {
        inner: Arc<T>,
    }

    impl<T: BucketService> BucketServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: BucketService> Clone for BucketServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T: BucketService> tonic::server::NamedService for BucketServiceServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for BucketServiceServer<T>
    where
        T: BucketService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = Arc::clone(&self.inner);

            match req.uri().path() {
                "/lobby.BucketService/Put" => {
                    struct PutSvc<T: BucketService>(Arc<T>);

                    impl<T: BucketService> tonic::server::ClientStreamingService<NewItem> for PutSvc<T> {
                        type Response = Empty;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(
                            &mut self,
                            request: tonic::Request<tonic::Streaming<NewItem>>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { <T as BucketService>::put(&inner, request).await })
                        }
                    }

                    Box::pin(async move {
                        let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        Ok(grpc.client_streaming(PutSvc(inner), req).await)
                    })
                }
                "/lobby.BucketService/Get" => {
                    struct GetSvc<T: BucketService>(Arc<T>);

                    impl<T: BucketService> tonic::server::UnaryService<Key> for GetSvc<T> {
                        type Response = Item;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(&mut self, request: tonic::Request<Key>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { <T as BucketService>::get(&inner, request).await })
                        }
                    }

                    Box::pin(async move {
                        let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        Ok(grpc.unary(GetSvc(inner), req).await)
                    })
                }
                "/lobby.BucketService/Delete" => {
                    struct DeleteSvc<T: BucketService>(Arc<T>);

                    impl<T: BucketService> tonic::server::UnaryService<Key> for DeleteSvc<T> {
                        type Response = Empty;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

                        fn call(&mut self, request: tonic::Request<Key>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { <T as BucketService>::delete(&inner, request).await })
                        }
                    }

                    Box::pin(async move {
                        let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        Ok(grpc.unary(DeleteSvc(inner), req).await)
                    })
                }
                "/lobby.BucketService/List" => {
                    struct ListSvc<T: BucketService>(Arc<T>);

                    impl<T: BucketService> tonic::server::ServerStreamingService<Page> for ListSvc<T> {
                        type Response = Item;
                        type ResponseStream = T::ListStream;
                        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                        fn call(&mut self, request: tonic::Request<Page>) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            Box::pin(async move { <T as BucketService>::list(&inner, request).await })
                        }
                    }

                    Box::pin(async move {
                        let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        Ok(grpc.server_streaming(ListSvc(inner), req).await)
                    })
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(tonic::body::empty_body());
                    let headers = response.headers_mut();
                    headers.insert(
                        "grpc-status",
                        http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static("application/grpc"),
                    );
                    Ok(response)
                }),
            }
        }
    }
}
